use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: SourceId,
    pub path: PathBuf,
    pub contents: String,
}

impl SourceFile {
    pub fn new(id: SourceId, path: PathBuf, contents: String) -> Self {
        // A UTF-8 BOM is accepted and discarded.
        let contents = match contents.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_string(),
            None => contents,
        };
        Self { id, path, contents }
    }
}
