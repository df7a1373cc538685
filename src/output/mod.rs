mod progress;
mod styling;
mod summary;
mod tables;

use styling::{banner, muted};

pub use progress::{JobProgress, RunProgress};
pub use summary::print_summary;

/// Prints the `runjenkins` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        banner("🛠  runjenkins"),
        muted(env!("CARGO_PKG_VERSION")),
        muted("Jenkins batch runner")
    );
}
