/// The literal text between the delimiters of a (non-raw) string token, with
/// `\`-escapes resolved. Raw strings never go through this — they are taken
/// verbatim (`spec.md` §4.A; confirmed against `original_source/src/parser.c`, see
/// `SPEC_FULL.md` §11.3). Lives in `raven_core` (not `raven_lexer`) so both the
/// lexer's own tests and the parser's string-literal node construction can share
/// it without a crate cycle.
pub fn unescape(quoted: &str) -> String {
  let inner = &quoted[1..quoted.len() - 1];
  let mut out = String::with_capacity(inner.len());
  let mut chars = inner.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('r') => out.push('\r'),
      Some('"') => out.push('"'),
      Some('\\') => out.push('\\'),
      Some(other) => out.push(other),
      None => {}
    }
  }
  out
}

/// Strips the leading/trailing backtick from a raw-string lexeme, taking the
/// contents verbatim (`spec.md` §4.A).
pub fn raw_contents(quoted: &str) -> &str {
  &quoted[1..quoted.len() - 1]
}
