/// Options for compiling source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileContext {
    filename: Option<String>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported in syntax errors.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub(crate) fn display_name(&self) -> &str {
        self.filename().unwrap_or("(eval)")
    }
}
