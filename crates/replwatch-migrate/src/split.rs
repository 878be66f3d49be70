//! SQL script splitting and preflight warnings.
//!
//! Statements end at `;` outside of string literals, quoted identifiers,
//! dollar-quoted bodies and comments. The script is still sent to each
//! database whole; splitting only feeds the preflight report.

/// One statement of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Source text, trimmed, without the terminating `;`.
    pub text: String,
    /// Upper-cased code with comments removed and literal contents blanked,
    /// whitespace collapsed. Used for keyword checks.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Code,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment(u32),
    Dollar(String),
}

#[derive(Default)]
struct Builder {
    text: String,
    code: String,
}

impl Builder {
    fn finish(&mut self, out: &mut Vec<Statement>) {
        let text = std::mem::take(&mut self.text);
        let code = std::mem::take(&mut self.code);
        let code = code.split_whitespace().collect::<Vec<_>>().join(" ");
        if !code.is_empty() {
            out.push(Statement {
                text: text.trim().to_string(),
                code: code.to_uppercase(),
            });
        }
    }
}

/// Dollar-quote tag starting at `chars[i]` (which is `$`), e.g. `$$` or
/// `$body$`. Positional parameters like `$1` are not tags.
fn dollar_tag(chars: &[char], i: usize) -> Option<String> {
    let mut j = i + 1;
    while j < chars.len() {
        let c = chars[j];
        if c == '$' {
            return Some(chars[i..=j].iter().collect());
        }
        let valid = c == '_' || c.is_alphabetic() || (j > i + 1 && c.is_ascii_digit());
        if !valid {
            return None;
        }
        j += 1;
    }
    None
}

fn starts_with_at(chars: &[char], i: usize, pattern: &str) -> bool {
    pattern
        .chars()
        .enumerate()
        .all(|(k, p)| chars.get(i + k) == Some(&p))
}

pub fn split_statements(script: &str) -> Vec<Statement> {
    let chars: Vec<char> = script.chars().collect();
    let mut out = Vec::new();
    let mut current = Builder::default();
    let mut mode = Mode::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match &mode {
            Mode::Code => match c {
                ';' => {
                    current.finish(&mut out);
                    i += 1;
                    continue;
                }
                '\'' => {
                    mode = Mode::SingleQuote;
                    current.code.push_str("''");
                }
                '"' => {
                    mode = Mode::DoubleQuote;
                    current.code.push_str("\"\"");
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    mode = Mode::LineComment;
                    current.code.push(' ');
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    mode = Mode::BlockComment(1);
                    current.text.push_str("/*");
                    current.code.push(' ');
                    i += 2;
                    continue;
                }
                '$' => {
                    let preceded_by_word = i > 0
                        && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_');
                    match dollar_tag(&chars, i).filter(|_| !preceded_by_word) {
                        Some(tag) => {
                            current.text.push_str(&tag);
                            current.code.push_str(" $$ ");
                            i += tag.chars().count();
                            mode = Mode::Dollar(tag);
                            continue;
                        }
                        None => current.code.push(c),
                    }
                }
                _ => current.code.push(c),
            },
            Mode::SingleQuote => {
                if c == '\'' {
                    mode = Mode::Code;
                }
            }
            Mode::DoubleQuote => {
                if c == '"' {
                    mode = Mode::Code;
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment(depth) => {
                let depth = *depth;
                if starts_with_at(&chars, i, "*/") {
                    current.text.push_str("*/");
                    mode = if depth == 1 {
                        Mode::Code
                    } else {
                        Mode::BlockComment(depth - 1)
                    };
                    i += 2;
                    continue;
                }
                if starts_with_at(&chars, i, "/*") {
                    current.text.push_str("/*");
                    mode = Mode::BlockComment(depth + 1);
                    i += 2;
                    continue;
                }
            }
            Mode::Dollar(tag) => {
                if starts_with_at(&chars, i, tag) {
                    let len = tag.chars().count();
                    current.text.push_str(tag);
                    mode = Mode::Code;
                    i += len;
                    continue;
                }
            }
        }
        current.text.push(c);
        i += 1;
    }
    current.finish(&mut out);
    out
}

/// Warnings about statements that deserve a second look.
pub fn preflight_warnings(statements: &[Statement]) -> Vec<String> {
    let mut warnings = Vec::new();
    for (n, statement) in statements.iter().enumerate() {
        let n = n + 1;
        let code = &statement.code;
        if ["DROP TABLE", "DROP DATABASE", "DROP SCHEMA", "TRUNCATE"]
            .iter()
            .any(|op| code.contains(op))
        {
            warnings.push(format!("Statement {n}: contains a destructive operation"));
        }
        if (code.starts_with("UPDATE ") || code.starts_with("DELETE "))
            && !code.contains(" WHERE ")
        {
            warnings.push(format!("Statement {n}: UPDATE/DELETE without WHERE clause"));
        }
        if ["BEGIN", "COMMIT", "ROLLBACK", "START TRANSACTION", "END"]
            .iter()
            .any(|kw| code == kw || code.starts_with(&format!("{kw} ")))
        {
            warnings.push(format!(
                "Statement {n}: transaction control is ignored, each database runs the script in one transaction"
            ));
        }
        if code.contains(" CONCURRENTLY") {
            warnings.push(format!(
                "Statement {n}: CONCURRENTLY cannot run inside a transaction block"
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(script: &str) -> Vec<String> {
        split_statements(script).into_iter().map(|s| s.text).collect()
    }

    #[test]
    fn splits_on_semicolons() {
        assert_eq!(
            texts("CREATE TABLE a (id int);\nINSERT INTO a VALUES (1);"),
            vec!["CREATE TABLE a (id int)", "INSERT INTO a VALUES (1)"]
        );
    }

    #[test]
    fn trailing_statement_without_semicolon() {
        assert_eq!(texts("SELECT 1; SELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn semicolons_inside_literals_and_identifiers() {
        let script = "INSERT INTO t VALUES ('a;b', 'it''s;'); ALTER TABLE \"odd;name\" ADD c int;";
        assert_eq!(split_statements(script).len(), 2);
    }

    #[test]
    fn semicolons_inside_comments() {
        let script = "-- first; still comment\nSELECT 1; /* block; /* nested; */ done; */ SELECT 2;";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].code, "SELECT 1");
        assert_eq!(statements[1].code, "SELECT 2");
    }

    #[test]
    fn dollar_quoted_function_body() {
        let script = r#"
CREATE FUNCTION bump() RETURNS trigger AS $body$
BEGIN
  NEW.updated_at := now();
  RETURN NEW;
END;
$body$ LANGUAGE plpgsql;
CREATE TRIGGER t BEFORE UPDATE ON a FOR EACH ROW EXECUTE FUNCTION bump();
"#;
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].text.ends_with("LANGUAGE plpgsql"));
    }

    #[test]
    fn positional_parameters_are_not_dollar_quotes() {
        let statements = split_statements("PREPARE q AS SELECT $1; SELECT 2;");
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn comment_only_script_has_no_statements() {
        assert!(split_statements("-- nothing here\n/* or here */ ;;").is_empty());
    }

    #[test]
    fn warns_about_risky_statements() {
        let statements = split_statements(
            "DROP TABLE old; UPDATE accounts SET active = false; \
             DELETE FROM log WHERE ts < now(); BEGIN; CREATE INDEX CONCURRENTLY i ON a (b);",
        );
        let warnings = preflight_warnings(&statements);
        assert_eq!(warnings.len(), 4);
        assert!(warnings[0].starts_with("Statement 1"));
        assert!(warnings[1].contains("without WHERE"));
        assert!(warnings[2].starts_with("Statement 4"));
        assert!(warnings[3].contains("CONCURRENTLY"));
    }

    #[test]
    fn keywords_inside_literals_do_not_warn() {
        let statements = split_statements("INSERT INTO notes VALUES ('DROP TABLE x');");
        assert!(preflight_warnings(&statements).is_empty());
    }
}
