//! Static VM placement table loaded from file.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use indexmap::IndexMap;
use log::{debug, info};

use crate::error::PlacementError;

/// Mapping of VM names to names of hosts they are placed on.
///
/// The file contains one `vmName,hostName` pair per line, `#` starts a comment line.
/// Entries keep the file order, a repeated VM name overrides the earlier entry.
#[derive(Debug, Clone, Default)]
pub struct PlacementTable {
    vm_to_host: IndexMap<String, String>,
}

impl PlacementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads placements from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PlacementError> {
        let path = path.as_ref();
        let io_error = |source| PlacementError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let table = Self::from_reader(file).map_err(io_error)?;
        info!("Loaded {} placements from {}", table.len(), path.display());
        Ok(table)
    }

    /// Reads placements from any reader.
    pub fn from_reader<R: Read>(input: R) -> std::io::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(input);
        let mut table = Self::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => match err.into_kind() {
                    csv::ErrorKind::Io(source) => return Err(source),
                    kind => {
                        debug!("Skipping unreadable placement record: {:?}", kind);
                        continue;
                    }
                },
            };
            match (record.get(0), record.get(1), record.len()) {
                (Some(vm), Some(host), 2) if !vm.is_empty() && !host.is_empty() => {
                    debug!("Loaded mapping: VM {} -> Host {}", vm, host);
                    table.insert(vm, host);
                }
                _ => debug!("Skipping malformed placement record: {:?}", record),
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, vm_name: &str, host_name: &str) {
        self.vm_to_host.insert(vm_name.to_string(), host_name.to_string());
    }

    pub fn host_of(&self, vm_name: &str) -> Option<&str> {
        self.vm_to_host.get(vm_name).map(String::as_str)
    }

    /// Iterates over `(vm_name, host_name)` pairs in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vm_to_host.iter().map(|(vm, host)| (vm.as_str(), host.as_str()))
    }

    /// Returns names of all hosts with at least one placed VM.
    pub fn used_hosts(&self) -> HashSet<String> {
        self.vm_to_host.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vm_to_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vm_to_host.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let content = "\
# vm,host
web0,h1
  web0-backup-1 , h2
broken line
a,b,c

web0-backup-0,h3
";
        let table = PlacementTable::from_reader(content.as_bytes()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.host_of("web0-backup-1"), Some("h2"));
        assert_eq!(table.host_of("a"), None);
        let order: Vec<&str> = table.iter().map(|(vm, _)| vm).collect();
        assert_eq!(order, vec!["web0", "web0-backup-1", "web0-backup-0"]);
        assert_eq!(table.used_hosts().len(), 3);
    }

    #[test]
    fn test_quoted_fields() {
        let content = "\"web0\",\"h1\"\n\"db,0\",h2\n";
        let table = PlacementTable::from_reader(content.as_bytes()).unwrap();
        assert_eq!(table.host_of("web0"), Some("h1"));
        assert_eq!(table.host_of("db,0"), Some("h2"));
    }

    #[test]
    fn test_load_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "web0,h1\nweb0,h2\ndb0,h1").unwrap();
        let table = PlacementTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.host_of("web0"), Some("h2"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PlacementTable::load("no/such/placements.txt"),
            Err(PlacementError::Io { .. })
        ));
    }
}
