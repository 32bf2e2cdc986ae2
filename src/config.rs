use std::path::PathBuf;

/// Startup configuration shared by the capture log and the server: the
/// listen port, the data directory, and the logging verbosity.
#[derive(Debug, Clone)]
pub struct Config {
   pub port: u16,
   pub data_dir: PathBuf,
   pub verbose: bool,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         port: 3456,
         data_dir: PathBuf::from("./data"),
         verbose: false,
      }
   }
}

impl Config {
   pub fn from_env() -> Self {
      let defaults = Self::default();
      let port = std::env::var("PORT")
         .ok()
         .and_then(|v| v.parse().ok())
         .unwrap_or(defaults.port);
      let data_dir = std::env::var("DATA_DIR")
         .map(PathBuf::from)
         .unwrap_or(defaults.data_dir);
      let verbose = std::env::var("VERBOSE")
         .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
         .unwrap_or(defaults.verbose);

      Self {
         port,
         data_dir,
         verbose,
      }
   }
}
