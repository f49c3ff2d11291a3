// Licensed under the Apache-2.0 license

//! Extraction of preprocessor defines from compiler flags.

use std::collections::HashMap;

use log::warn;

/// A single `-D` define.  A bare `-DNAME` is a flag, `-DNAME=VALUE` carries a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Define {
    Flag(String),
    Value(String, String),
}

impl Define {
    fn parse(s: &str) -> Option<Self> {
        match s.split_once('=') {
            Some((name, _)) if name.is_empty() => None,
            Some((name, value)) => Some(Define::Value(name.to_string(), value.to_string())),
            None if s.is_empty() => None,
            None => Some(Define::Flag(s.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Define::Flag(name) | Define::Value(name, _) => name,
        }
    }
}

/// The defines of a build, keyed by name.  When a name is defined more than once the last
/// definition wins, as it would on a compiler command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines(HashMap<String, Define>);

impl Defines {
    pub fn get(&self, name: &str) -> Option<&Define> {
        self.0.get(name)
    }

    /// Whether `name` is defined to something which enables a feature.  A bare flag is truthy, a
    /// value is truthy unless it is empty.  The value is a string, so `-DNAME=0` is truthy too.
    pub fn is_truthy(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Define::Flag(_)) => true,
            Some(Define::Value(_, value)) => !value.is_empty(),
            None => false,
        }
    }
}

impl FromIterator<Define> for Defines {
    fn from_iter<I: IntoIterator<Item = Define>>(iter: I) -> Self {
        Defines(iter.into_iter().map(|d| (d.name().to_string(), d)).collect())
    }
}

/// Split a flag string into tokens the way a shell would.  A string with unbalanced quotes is
/// skipped with a warning.
fn split_flags(s: &str) -> Vec<String> {
    shlex::split(s).unwrap_or_else(|| {
        warn!("Ignoring build flags with unbalanced quotes: {s}");
        Vec::new()
    })
}

/// Parse the defines out of a list of compiler flag strings.  Each string may hold several
/// flags.  Flags other than `-D` are ignored.
pub fn parse_defines<S: AsRef<str>>(flags: &[S]) -> Defines {
    let mut defines = Vec::new();
    let mut tokens = flags.iter().flat_map(|f| split_flags(f.as_ref()));
    while let Some(token) = tokens.next() {
        let Some(rest) = token.strip_prefix("-D") else {
            continue;
        };

        // `-D NAME` carries the define in the next token.
        let define = if rest.is_empty() {
            match tokens.next() {
                Some(next) => Define::parse(&next),
                None => None,
            }
        } else {
            Define::parse(rest)
        };
        defines.extend(define);
    }
    defines.into_iter().collect()
}
