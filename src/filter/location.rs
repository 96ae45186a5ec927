use regex::Regex;

use crate::{error::FilterError, node::CodeLocation};

/// A `path-regex[:line[-line]]` file filter.
///
/// Line ranges are half open, so `foo.rs:10-20` covers lines 10 through 19
/// and `foo.rs:10` covers line 10 only.
#[derive(Debug, Clone)]
pub struct LocationFilter {
    path: Regex,
    lines: Vec<(u32, u32)>,
}

impl LocationFilter {
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        let invalid = |reason: String| FilterError::Location {
            filter: filter.to_string(),
            reason,
        };

        let mut parts = filter.split(':');
        let path = parts.next().unwrap_or_default();
        if path.is_empty() {
            return Err(invalid("the path pattern is empty".into()));
        }
        let path = Regex::new(path).map_err(|err| invalid(err.to_string()))?;

        let parse_line = |s: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| invalid(format!("{s:?} is not a line number")))
        };
        let mut lines = Vec::new();
        for part in parts {
            let range = match part.split_once('-') {
                Some((start, end)) => (parse_line(start)?, parse_line(end)?),
                None => {
                    let line = parse_line(part)?;
                    let end = line
                        .checked_add(1)
                        .ok_or_else(|| invalid(format!("line {line} is out of range")))?;
                    (line, end)
                }
            };
            if range.0 >= range.1 {
                return Err(invalid(format!("the line range {part} is empty")));
            }
            lines.push(range);
        }
        Ok(Self { path, lines })
    }

    pub fn matches(&self, location: &CodeLocation) -> bool {
        if !self.path.is_match(&location.file) {
            return false;
        }
        self.lines.is_empty()
            || self
                .lines
                .iter()
                .any(|(start, end)| (*start..*end).contains(&location.line))
    }
}
