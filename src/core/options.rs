use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

bitflags::bitflags! {
    /// Portability toggles that make results look the same across engines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Portability: u32 {
        /// Fold column names to the configured `field_case`.
        const FIX_CASE = 0b0000_0001;
        /// Turn empty text fields into NULL.
        const EMPTY_TO_NULL = 0b0000_0010;
        /// Strip trailing whitespace from text fields.
        const RTRIM = 0b0000_0100;
    }
}

impl Default for Portability {
    fn default() -> Self {
        Portability::empty()
    }
}

/// Target case for column-name folding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldCase {
    #[default]
    Lower,
    Upper,
}

impl FieldCase {
    pub fn fold(self, name: &str) -> String {
        match self {
            FieldCase::Lower => name.to_lowercase(),
            FieldCase::Upper => name.to_uppercase(),
        }
    }
}

/// Shape of the rows a fetch returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Use the session's configured mode
    #[default]
    Default,
    /// Positional rows
    Ordered,
    /// Name-keyed rows
    Assoc,
    /// Records built from name-keyed rows
    Object,
}

impl FetchMode {
    /// Resolves `Default` against the configured mode; a configured `Default`
    /// means ordered rows.
    pub fn resolve(self, configured: FetchMode) -> FetchMode {
        match (self, configured) {
            (FetchMode::Default, FetchMode::Default) => FetchMode::Ordered,
            (FetchMode::Default, mode) => mode,
            (mode, _) => mode,
        }
    }

    /// Whether rows in this mode are fetched by column name.
    pub fn is_named(self) -> bool {
        matches!(self, FetchMode::Assoc | FetchMode::Object)
    }
}

/// Session options read by the portability layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub portability: Portability,
    pub field_case: FieldCase,
    /// Class name given to records built in object mode
    pub fetch_class: String,
    pub fetch_mode: FetchMode,
    /// Chunk size for large-object reads and transmission
    pub lob_buffer_length: usize,
    /// Whether URL-looking lob values are opened as streams
    pub lob_allow_url_include: bool,
    /// Buffer complete native statement results before wrapping them
    pub result_buffering: bool,
    /// Dry-run mode: statements return stub results without touching the engine
    pub disable_query: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            portability: Portability::empty(),
            field_case: FieldCase::Lower,
            fetch_class: "record".to_string(),
            fetch_mode: FetchMode::Ordered,
            lob_buffer_length: 8192,
            lob_allow_url_include: false,
            result_buffering: true,
            disable_query: false,
        }
    }
}

impl Options {
    pub fn with_portability(mut self, portability: Portability) -> Self {
        self.portability = portability;
        self
    }

    pub fn with_field_case(mut self, field_case: FieldCase) -> Self {
        self.field_case = field_case;
        self
    }

    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    pub fn with_fetch_class(mut self, fetch_class: impl Into<String>) -> Self {
        self.fetch_class = fetch_class.into();
        self
    }

    pub fn with_lob_buffer_length(mut self, length: usize) -> Self {
        self.lob_buffer_length = length;
        self
    }

    pub fn with_lob_url_include(mut self, allow: bool) -> Self {
        self.lob_allow_url_include = allow;
        self
    }

    pub fn with_disable_query(mut self, disable: bool) -> Self {
        self.disable_query = disable;
        self
    }

    /// Parses options from TOML text and validates them.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: Options =
            toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.lob_buffer_length == 0 {
            return Err(DbError::Config(
                "lob_buffer_length must be at least 1".to_string(),
            ));
        }
        if self.fetch_class.trim().is_empty() {
            return Err(DbError::Config("fetch_class must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Loads session options from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let options = dbport::load_options("dbport.toml").expect("Failed to load options");
/// println!("{:?}", options);
/// ```
pub fn load_options<P: AsRef<Path>>(path: P) -> Result<Options> {
    let content = fs::read_to_string(path)?;
    Options::from_toml_str(&content)
}
