//! Pre-built descriptors of datarefs and commands, as a static catalog of well-known simulator
//!  variables would provide them. A descriptor carries only static information: subscribing
//!  with one creates a fresh subscription, just like subscribing by path.

use std::borrow::Cow;

pub const DEFAULT_FREQUENCY: i32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRefElement {
    pub path: Cow<'static, str>,
    pub units: Cow<'static, str>,
    pub description: Cow<'static, str>,
    /// requested updates per second when subscribing without an explicit frequency
    pub frequency: i32,
}

impl DataRefElement {
    pub const fn new(path: &'static str, units: &'static str, description: &'static str) -> DataRefElement {
        DataRefElement {
            path: Cow::Borrowed(path),
            units: Cow::Borrowed(units),
            description: Cow::Borrowed(description),
            frequency: DEFAULT_FREQUENCY,
        }
    }

    pub fn with_frequency(mut self, frequency: i32) -> DataRefElement {
        self.frequency = frequency;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringDataRefElement {
    pub path: Cow<'static, str>,
    pub buffer_size: usize,
    pub description: Cow<'static, str>,
    pub frequency: i32,
}

impl StringDataRefElement {
    pub const fn new(path: &'static str, buffer_size: usize, description: &'static str) -> StringDataRefElement {
        StringDataRefElement {
            path: Cow::Borrowed(path),
            buffer_size,
            description: Cow::Borrowed(description),
            frequency: DEFAULT_FREQUENCY,
        }
    }

    pub fn with_frequency(mut self, frequency: i32) -> StringDataRefElement {
        self.frequency = frequency;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XPlaneCommand {
    pub command: Cow<'static, str>,
    pub description: Cow<'static, str>,
}

impl XPlaneCommand {
    pub const fn new(command: &'static str, description: &'static str) -> XPlaneCommand {
        XPlaneCommand {
            command: Cow::Borrowed(command),
            description: Cow::Borrowed(description),
        }
    }
}

impl AsRef<str> for XPlaneCommand {
    fn as_ref(&self) -> &str {
        &self.command
    }
}
