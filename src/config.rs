use clap::{Args as ClapArgs, ValueEnum};

const DEFAULT_API_URL: &str = "https://performance.ozon.ru";
const KEYS_FILE: &str = "./keys.json";
const HISTORY_DIR: &str = "./history";
const OUTPUT_DIR: &str = "./data";

#[derive(ClapArgs)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
    pub(crate) api_url: String,

    /// JSON file with the ordered list of account credentials.
    #[arg(long, default_value = KEYS_FILE, env = "KEYS_FILE")]
    pub(crate) keys_file: String,

    /// Directory holding the persisted analytics table as parquet parts.
    #[arg(long, default_value = HISTORY_DIR, env = "HISTORY_DIR")]
    pub(crate) history_dir: String,

    #[arg(long, default_value = OUTPUT_DIR, env = "OUTPUT_DIR")]
    pub(crate) output_dir: String,

    /// Report kinds to collect, comma separated.
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_value = "statistics",
        env = "REPORTS"
    )]
    pub(crate) reports: Vec<ReportKind>,

    /// Ozon rejects report requests spanning more days than this.
    #[arg(long, default_value_t = 5, env = "DAY_LIMIT")]
    pub(crate) day_limit: i64,

    /// Ozon rejects report requests covering more campaigns than this.
    #[arg(long, default_value_t = 5, env = "CAMPAIGN_LIMIT")]
    pub(crate) campaign_limit: usize,

    #[arg(long, default_value_t = 5, env = "RATE_LIMIT_ATTEMPTS")]
    pub(crate) rate_limit_attempts: u32,

    #[arg(long, default_value_t = 3, env = "RATE_LIMIT_DELAY_SECS")]
    pub(crate) rate_limit_delay_secs: u64,

    #[arg(long, default_value_t = 1, env = "POLL_INTERVAL_SECS")]
    pub(crate) poll_interval_secs: u64,

    /// Reports still pending after this many status checks are dropped.
    #[arg(long, default_value_t = 120, env = "POLL_ATTEMPTS")]
    pub(crate) poll_attempts: u32,

    /// Keep downloaded zip archives next to their extracted files.
    #[arg(long, env = "KEEP_ARCHIVES")]
    pub(crate) keep_archives: bool,

    /// Also append the delta to the history store. Off by default: uploads
    /// are normally driven out-of-band.
    #[arg(long, env = "UPLOAD")]
    pub(crate) upload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    Statistics,
    Phrases,
    Attribution,
    Media,
    Product,
    Daily,
}

impl ReportKind {
    /// Subfolder name inside an account's output directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            ReportKind::Statistics => "statistics",
            ReportKind::Phrases => "phrases",
            ReportKind::Attribution => "attribution",
            ReportKind::Media => "media",
            ReportKind::Product => "product",
            ReportKind::Daily => "daily",
        }
    }
}
