//! The ordered, de-duplicated list of task names for one run.

use camino::Utf8Path;
use std::collections::HashSet;
use std::fs;
use std::io;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TaskError {
    #[error("No tasks given")]
    Empty,
    #[error("Invalid task name {0:?}: only letters, digits, '.', '_' and '-' are allowed")]
    InvalidName(String),
}

/// Task names in input order. Line N of the artifact is array index N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskList {
    names: Vec<String>,
}

impl TaskList {
    /// Parse comma-separated user input, e.g. `"s1, s2,,s3"`.
    pub fn parse(input: &str) -> Result<Self, TaskError> {
        Self::from_names(input.split(','))
    }

    /// Build from names. Whitespace is trimmed, empty entries dropped and
    /// repeats collapse onto their first occurrence.
    pub fn from_names<I, S>(names: I) -> Result<Self, TaskError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if !is_valid_name(name) {
                return Err(TaskError::InvalidName(name.to_string()));
            }
            if seen.insert(name.to_string()) {
                unique.push(name.to_string());
            } else {
                tracing::debug!("Dropping repeated task {}", name);
            }
        }

        if unique.is_empty() {
            return Err(TaskError::Empty);
        }
        Ok(Self { names: unique })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name at a 1-based array index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.names.get(i))
            .map(String::as_str)
    }

    /// Write the newline-delimited artifact the array runner reads.
    pub fn write_artifact(&self, path: &Utf8Path) -> io::Result<()> {
        let mut content = self.names.join("\n");
        content.push('\n');
        fs::write(path, content)
    }
}

/// Task names become directory names and shell words.
fn is_valid_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_trims_and_dedups() {
        let tasks = TaskList::parse(" s2, s1,,s2 ,s3 ").unwrap();
        assert_eq!(tasks.names(), ["s2", "s1", "s3"]);
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn test_parse_rejects_empty_and_unsafe_names() {
        assert_eq!(TaskList::parse(" , ,"), Err(TaskError::Empty));
        assert_eq!(
            TaskList::parse("ok,bad name"),
            Err(TaskError::InvalidName("bad name".into()))
        );
        assert_eq!(
            TaskList::parse("$(rm -rf x)"),
            Err(TaskError::InvalidName("$(rm -rf x)".into()))
        );
        assert_eq!(TaskList::parse(".."), Err(TaskError::InvalidName("..".into())));
        assert!(TaskList::parse("sample_1.v2-b").is_ok());
    }

    #[test]
    fn test_name_at_is_one_based() {
        let tasks = TaskList::from_names(["a", "b"]).unwrap();
        assert_eq!(tasks.name_at(0), None);
        assert_eq!(tasks.name_at(1), Some("a"));
        assert_eq!(tasks.name_at(2), Some("b"));
        assert_eq!(tasks.name_at(3), None);
    }

    #[test]
    fn test_write_artifact() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("tasks.txt");
        TaskList::from_names(["s1", "s2", "s3"])
            .unwrap()
            .write_artifact(&path)
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "s1\ns2\ns3\n");
    }
}
