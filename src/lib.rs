// Registry Harvest - Core Library
// Paged retrieval of listed persons + historical division resolution

pub mod config;
pub mod db;
pub mod division;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod harvest;
pub mod person;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use config::HarvestConfig;
pub use db::{
    HarvestRun, InsertStats, ProvinceStat,
    setup_database, insert_persons, insert_run,
    get_all_persons, get_runs, get_province_stats, verify_count,
};
pub use division::{
    CodeTable, Division, DivisionResolver, DivisionTable, Revision,
    revision_year,
};
pub use error::{DecodeError, DivisionError, FetchError, HarvestError, TransportError};
pub use export::{export_csv, write_persons};
pub use fetcher::{
    EndpointSettings, Envelope, PagedFetcher, RawRecord,
    check_page_request, CAPACITY, SUCCESS_MESSAGE,
};
pub use harvest::{run_harvest, HarvestOptions};
pub use person::Person;
pub use stream::{
    CancelToken, Cursor, ExhaustionPolicy, RecordStream,
    page_bound, produce_entities,
};
pub use transport::{HttpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
