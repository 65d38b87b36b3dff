use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Nodejs12,
    Nodejs10,
    Python38,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Nodejs12 => "nodejs12",
            Runtime::Nodejs10 => "nodejs10",
            Runtime::Python38 => "python38",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Files a runtime reads its function body and dependency manifest from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFiles {
    pub source: &'static str,
    pub deps: &'static str,
}

impl RuntimeFiles {
    /// `(spec field, file name)` pairs.
    pub fn fields(&self) -> [(&'static str, &'static str); 2] { [("source", self.source), ("deps", self.deps)] }
}

const NODEJS: RuntimeFiles = RuntimeFiles { source: "handler.js", deps: "package.json" };
const PYTHON: RuntimeFiles = RuntimeFiles { source: "handler.py", deps: "requirements.txt" };

/// Runtime → file lookup. Built once and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTable {
    files: BTreeMap<Runtime, RuntimeFiles>,
}

impl RuntimeTable {
    pub fn standard() -> Self {
        Self {
            files: BTreeMap::from([
                (Runtime::Nodejs12, NODEJS),
                (Runtime::Nodejs10, NODEJS),
                (Runtime::Python38, PYTHON),
            ]),
        }
    }

    pub fn files(&self, runtime: Runtime) -> Option<&RuntimeFiles> { self.files.get(&runtime) }

    pub fn runtimes(&self) -> impl Iterator<Item = Runtime> + '_ { self.files.keys().copied() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_every_runtime() {
        let t = RuntimeTable::standard();
        assert_eq!(t.runtimes().count(), 3);
        assert_eq!(t.files(Runtime::Nodejs10), Some(&NODEJS));
        assert_eq!(t.files(Runtime::Python38).map(|f| f.deps), Some("requirements.txt"));
    }

    #[test]
    fn runtime_names_round_trip_through_yaml() {
        let r: Runtime = serde_yaml::from_str("nodejs12").expect("parse");
        assert_eq!(r, Runtime::Nodejs12);
        assert_eq!(r.to_string(), "nodejs12");
    }
}
