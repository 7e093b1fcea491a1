//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

/// Default Corellium API base URL when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://app.corellium.com/";

/// Fixed delay between two status polls of the same assessment.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Environment variable holding the API access token.
pub const ENV_ACCESS_TOKEN: &str = "CORELLIUM_API_TOKEN";

/// Environment variable overriding the API base URL.
pub const ENV_ENDPOINT: &str = "CORELLIUM_ENDPOINT";

/// File name of the uploaded keyword wordlist.
pub const WORDLIST_FILE_NAME: &str = "keywords.txt";

/// Image type and encoding the artifact service expects for wordlists.
pub const WORDLIST_IMAGE_TYPE: &str = "extension";
pub const WORDLIST_ENCODING: &str = "plain";

/// Default config database path: `~/.matrix-driver/config.db`.
/// `None` when the home directory cannot be determined.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".matrix-driver").join("config.db"))
}
