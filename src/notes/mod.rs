pub mod markdown;

pub use markdown::ReportWriter;
