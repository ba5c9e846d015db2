use clap::{CommandFactory, Parser};

use media_sort::config::{Config, MediaSortArgs};
use media_sort::sort::MediaSort;

fn main() -> anyhow::Result<()> {
    let args = MediaSortArgs::parse();
    if let Some(ref shell) = args.completion {
        return media_sort::generate_shell_completion(*shell, MediaSortArgs::command(), true, env!("CARGO_BIN_NAME"));
    }

    let config = Config::from_args(args)?;
    if config.debug {
        eprintln!("Config: {config:#?}");
    }

    let mut sort = MediaSort::new(config)?;
    sort.run().print_summary();
    Ok(())
}
