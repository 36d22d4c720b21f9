pub mod coveralls;
pub mod lcov;

use std::path::Path;

use crate::detect::Format;
use crate::error::Result;
use crate::model::CoverageData;

/// Every input format parser implements this trait.
pub trait CoverageParser {
    fn format(&self) -> Format;

    /// Cheap sniffing by file name and the first few KB of content.
    fn can_parse(&self, path: &Path, content: &[u8]) -> bool;

    /// Parse the input bytes into the uniform artifact model.
    fn parse(&self, input: &[u8]) -> Result<CoverageData>;
}

pub fn parser_for(format: Format) -> &'static dyn CoverageParser {
    match format {
        Format::Coveralls => &coveralls::CoverallsParser,
        Format::Lcov => &lcov::LcovParser,
    }
}
