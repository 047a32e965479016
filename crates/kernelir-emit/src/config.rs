use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Colored output cannot be parsed back; leave it off for anything but terminals.
    pub use_colors: bool,
    pub indent_style: IndentStyle,
    /// Print instruction metadata attachments.
    pub include_metadata: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            use_colors: false,
            indent_style: IndentStyle::Spaces(2),
            include_metadata: true,
        }
    }
}

impl EmitterConfig {
    pub fn terminal() -> Self {
        Self {
            use_colors: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndentStyle {
    Spaces(usize),
    Tabs,
}

impl IndentStyle {
    pub fn unit(&self) -> String {
        match self {
            IndentStyle::Spaces(n) => " ".repeat(*n),
            IndentStyle::Tabs => "\t".to_string(),
        }
    }
}
