pub mod archive;
pub mod audit;
pub mod config;
pub mod extract;
pub mod historical;
pub mod industry;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod period;
pub mod reconcile;
pub mod resolver;
pub mod snapshot;
pub mod table;
pub mod util;
pub mod warn;
pub mod workbook;
