pub mod analysis;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ip_info;
pub mod received;
pub mod report;
pub mod scorer;
pub mod tokenizer;
pub mod workspace;

pub use analysis::Analysis;
pub use classifier::{AnalysisContext, FieldClassifier};
pub use config::Config;
pub use error::FieldError;
pub use ip_info::{GeoDetail, IpInfoClient};
pub use received::{HopAssessment, HopCategory, ReceivedChainAnalyzer};
pub use report::ReportPresenter;
pub use scorer::{SuspicionBand, TrustScorer, VerdictSet};
pub use tokenizer::{HeaderField, HeaderTokenizer};
