use std::collections::BTreeMap;

/// One row of whitespace-column output, keyed by header.
pub type Row = BTreeMap<String, String>;

/// Parse `ps`-style output: the first line names the columns, each later line
/// is split into at most that many fields, the last field keeping the rest.
pub(crate) fn parse(text: &str) -> Vec<Row> {
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let fields: Vec<&str> = header.split_whitespace().collect();
    lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            split_fields(line, fields.len())
                .into_iter()
                .zip(&fields)
                .map(|(value, field)| (field.to_string(), value.to_string()))
                .collect()
        })
        .collect()
}

/// Split on runs of whitespace into at most `max` fields.
fn split_fields(line: &str, max: usize) -> Vec<&str> {
    let mut result = Vec::with_capacity(max);
    let mut rest = line.trim();
    while !rest.is_empty() && result.len() + 1 < max {
        match rest.find(char::is_whitespace) {
            Some(end) => {
                result.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                result.push(rest);
                rest = "";
            }
        }
    }
    if !rest.is_empty() && max > 0 {
        result.push(rest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_columns() {
        let table = parse("field1 field2\nvalue1 value2\nvalue3 value4\n");
        assert_eq!(
            table,
            vec![
                row(&[("field1", "value1"), ("field2", "value2")]),
                row(&[("field1", "value3"), ("field2", "value4")]),
            ]
        );
    }

    #[test]
    fn last_column_keeps_the_remainder() {
        let table = parse("  PID TTY          TIME CMD\n 4242 pts/4    00:00:01 vim notes.txt\n");
        assert_eq!(
            table,
            vec![row(&[
                ("PID", "4242"),
                ("TTY", "pts/4"),
                ("TIME", "00:00:01"),
                ("CMD", "vim notes.txt"),
            ])]
        );
    }

    #[test]
    fn empty_output_is_an_empty_table() {
        assert!(parse("").is_empty());
        assert!(parse("ONLY HEADERS\n").is_empty());
    }
}
