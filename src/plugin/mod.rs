pub mod scan;

pub use scan::{MatchPolicy, PluginScanner, ScanError, ScanReport, ScanVerdict, SizePolicy};
