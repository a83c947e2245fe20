use regex::Regex;
use std::sync::LazyLock;
use toml_edit::{Item, TableLike};

static TABLE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*\[\[?([^\[\]"']+)\]\]?\s*(?:#.*)?$"#).expect("header pattern is valid")
});

/// A single-line string literal found in TOML source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    /// 1-based line number.
    pub line: usize,
    /// Byte range of the literal's contents (quotes excluded) within the line.
    pub start: usize,
    pub end: usize,
    pub value: String,
    /// Dotted name of the enclosing table header, `""` for the root table.
    pub table: String,
}

/// Split text into lines, dropping the `\n` / `\r\n` terminators.
pub fn split_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split_inclusive('\n').map(|line| {
        let content = line
            .strip_suffix("\r\n")
            .or_else(|| line.strip_suffix('\n'))
            .unwrap_or(line);
        (content, &line[content.len()..])
    })
}

/// Helpers for inspecting pyproject TOML structures.
pub struct TomlUtils;

impl TomlUtils {
    /// String entries of an array item; non-string entries are skipped.
    pub fn string_array(item: &Item) -> Vec<String> {
        item.as_array()
            .map(|array| {
                array
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(key, strings)` for every array-valued key of a table.
    pub fn string_arrays(table: &dyn TableLike) -> Vec<(String, Vec<String>)> {
        table
            .iter()
            .filter(|(_, item)| item.is_array())
            .map(|(key, item)| (key.to_string(), Self::string_array(item)))
            .collect()
    }

    /// Locate every single-line string literal outside comments, tagged
    /// with its line and enclosing table. Contents of multi-line strings are
    /// skipped, and literals whose contents use escapes are left out since
    /// their source text differs from their value.
    pub fn scan_string_literals(text: &str) -> Vec<StringLiteral> {
        let mut literals = Vec::new();
        let mut table = String::new();
        let mut in_multiline: Option<&str> = None;

        for (index, (line, _)) in split_lines(text).enumerate() {
            let line_no = index + 1;

            let from = match in_multiline {
                Some(delim) => match line.find(delim) {
                    Some(pos) => {
                        in_multiline = None;
                        pos + delim.len()
                    }
                    None => continue,
                },
                None => {
                    if let Some(caps) = TABLE_HEADER.captures(line) {
                        table = caps[1]
                            .split('.')
                            .map(str::trim)
                            .collect::<Vec<_>>()
                            .join(".");
                        continue;
                    }
                    0
                }
            };

            in_multiline = Self::scan_line(line, from, line_no, &table, &mut literals);
        }

        literals
    }

    /// Scan `line` from byte `from`. Returns the delimiter of a multi-line
    /// string still open at the end of the line.
    fn scan_line(
        line: &str,
        from: usize,
        line_no: usize,
        table: &str,
        out: &mut Vec<StringLiteral>,
    ) -> Option<&'static str> {
        let bytes = line.as_bytes();
        let mut i = from;
        while i < bytes.len() {
            match bytes[i] {
                b'#' => break,
                quote @ (b'"' | b'\'') => {
                    let delim = if quote == b'"' { "\"\"\"" } else { "'''" };
                    if line[i..].starts_with(delim) {
                        match line[i + 3..].find(delim) {
                            Some(close) => {
                                i += close + 6;
                                continue;
                            }
                            None => return Some(delim),
                        }
                    }

                    let start = i + 1;
                    let mut j = start;
                    let mut escaped = false;
                    while j < bytes.len() && bytes[j] != quote {
                        if quote == b'"' && bytes[j] == b'\\' {
                            escaped = true;
                            j += 1;
                        }
                        j += 1;
                    }
                    if j >= bytes.len() {
                        break;
                    }
                    if !escaped {
                        out.push(StringLiteral {
                            line: line_no,
                            start,
                            end: j,
                            value: line[start..j].to_string(),
                            table: table.to_string(),
                        });
                    }
                    i = j + 1;
                }
                _ => i += 1,
            }
        }
        None
    }
}
