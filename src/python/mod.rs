pub mod pypi;
pub mod releases;
pub mod specifier;
pub mod version;

pub use pypi::PyPiClient;
pub use releases::EndOfLifeClient;
