//! Field selection and renaming
//!
//! A field spec has the form `out=alt1;alt2`: the first alternative present
//! in the record is stored under `out`. Without `=`, the output name is
//! the first alternative, so `jpg;png` keeps whichever exists as `jpg`.

use std::fmt;
use std::str::FromStr;

use datapipes_core::{
    BoxFuture, Bytes, Emitter, Error, Record, RecordStream, Result, RunContext, Stage, KEY_FIELD,
};

/// One output field and the input fields it may come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Name in the output record
    output: String,

    /// Input field names, in order of preference
    alternatives: Vec<String>,
}

impl FieldSpec {
    /// Select `name` unchanged
    pub fn select(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output: name.clone(),
            alternatives: vec![name],
        }
    }

    /// Output field name
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Accepted input field names
    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    fn pick<'r>(&self, record: &'r Record) -> Option<&'r Bytes> {
        self.alternatives.iter().find_map(|name| record.get(name))
    }
}

impl FromStr for FieldSpec {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self> {
        let (output, sources) = match spec.split_once('=') {
            Some((output, sources)) => (Some(output.trim()), sources),
            None => (None, spec),
        };

        let alternatives: Vec<String> = sources.split(';').map(|s| s.trim().to_owned()).collect();
        if alternatives.iter().any(String::is_empty) {
            return Err(Error::Config(format!("empty field name in spec '{spec}'")));
        }

        let output = match output {
            Some("") => return Err(Error::Config(format!("empty output name in spec '{spec}'"))),
            Some(output) => output.to_owned(),
            None => alternatives[0].clone(),
        };

        Ok(Self { output, alternatives })
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = self.alternatives.join(";");
        if self.alternatives.len() == 1 && self.alternatives[0] == self.output {
            write!(f, "{sources}")
        } else {
            write!(f, "{}={}", self.output, sources)
        }
    }
}

/// Rebuilds each record from an ordered list of field specs.
///
/// The key is always carried. In strict mode a record lacking every
/// alternative of some spec fails the stream; otherwise the field is left
/// out.
#[derive(Debug, Clone)]
pub struct Rename {
    specs: Vec<FieldSpec>,
    strict: bool,
}

impl Rename {
    /// Create from parsed specs
    pub fn new(specs: Vec<FieldSpec>, strict: bool) -> Self {
        Self { specs, strict }
    }

    /// Parse textual specs. A `__key__` entry is accepted and skipped since
    /// the key is always kept.
    pub fn parse<S: AsRef<str>>(specs: &[S], strict: bool) -> Result<Self> {
        let specs = specs
            .iter()
            .map(AsRef::<str>::as_ref)
            .filter(|spec| *spec != KEY_FIELD)
            .map(str::parse)
            .collect::<Result<Vec<FieldSpec>>>()?;
        if specs.is_empty() {
            return Err(Error::Config("rename needs at least one field".into()));
        }
        Ok(Self::new(specs, strict))
    }

    /// Output field specs
    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    /// Whether missing fields are fatal
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Build the renamed record
    pub fn apply(&self, record: &Record) -> Result<Record> {
        let mut renamed = Record::new(record.key());
        for spec in &self.specs {
            match spec.pick(record) {
                Some(value) => renamed.insert(spec.output.clone(), value.clone()),
                None if self.strict => {
                    return Err(Error::MissingField {
                        key: record.key().to_owned(),
                        field: spec.to_string(),
                    })
                }
                None => {}
            }
        }
        Ok(renamed)
    }
}

impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn run<'a>(
        &'a mut self,
        input: &'a mut RecordStream,
        output: &'a mut Emitter,
        _ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            while let Some(record) = input.next().await? {
                output.emit(self.apply(&record)?).await?;
            }
            Ok(())
        })
    }
}
