use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::commands;

/// Styles for CLI
fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .literal(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::BrightCyan))),
    )
    .usage(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
}

#[derive(Debug, Parser)]
#[command(author, about, version)]
#[command(propagate_version = true)]
#[command(styles=get_styles())]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,

  #[clap(flatten)]
  pub verbose: Verbosity<InfoLevel>,

  /// Disable colored output
  #[arg(long, global = true)]
  pub no_color: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Tear down a cluster and everything deployed around it
  ///
  /// Drains application-level state first when the cluster is reachable, then removes
  /// conflict-prone named resources, destroys the Terraform modules in dependency order,
  /// and sweeps up controller-created load balancers and security groups
  Teardown(commands::teardown::Teardown),

  /// Probe which teardown-managed resources still exist
  Status(commands::status::Status),
}
