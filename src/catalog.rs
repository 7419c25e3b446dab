//! Class catalog
//!
//! Ordered list of class names loaded once at startup from a
//! newline-delimited file (the COCO label list shipped next to the model).
//! The model reports 1-based class ids, so id `i` maps to `names[i - 1]`.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};

pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    /// Load the catalog from a newline-delimited file. Blank lines and
    /// surrounding whitespace are ignored. An empty or missing file is a
    /// startup-fatal error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read class list {}", path.display()))?;

        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        ensure!(!names.is_empty(), "class list {} is empty", path.display());

        log::info!("Loaded {} class names from {}", names.len(), path.display());
        Ok(Self { names })
    }

    #[cfg(test)]
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a 1-based model class id to its name. Returns `None` for ids
    /// outside `1..=len`, which callers must treat as malformed model output.
    pub fn label(&self, class_id: u32) -> Option<&str> {
        if class_id == 0 {
            return None;
        }
        self.names.get(class_id as usize - 1).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_list(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_newline_delimited_names() {
        let file = write_list("person\nbicycle\ncar\n");
        let catalog = ClassCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.label(1), Some("person"));
        assert_eq!(catalog.label(3), Some("car"));
    }

    #[test]
    fn skips_blank_lines_and_whitespace() {
        let file = write_list("person\n\n  car  \n\n");
        let catalog = ClassCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.label(2), Some("car"));
    }

    #[test]
    fn rejects_missing_file() {
        assert!(ClassCatalog::load("does/not/exist.names").is_err());
    }

    #[test]
    fn rejects_empty_file() {
        let file = write_list("\n\n");
        assert!(ClassCatalog::load(file.path()).is_err());
    }

    #[test]
    fn out_of_range_ids_have_no_label() {
        let catalog = ClassCatalog::from_names(vec!["person".into(), "car".into()]);
        assert_eq!(catalog.label(0), None);
        assert_eq!(catalog.label(3), None);
        assert_eq!(catalog.label(99), None);
    }
}
