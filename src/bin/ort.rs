//! `ort`: compile a configuration into C bindings, SQLite DDL, or a
//! migration against an older configuration.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use ort::diag::Diagnostics;
use ort::{diff, lang_c, parse_config, parse_link, sql, sqldiff, Config};

#[derive(Parser)]
#[command(name = "ort", version, about = "Compile an ort configuration")]
struct Cli {
    /// Emit the C header (the default operation)
    #[arg(short = 'C')]
    header: bool,

    /// Emit the C source implementing the named header
    #[arg(short = 'c', value_name = "header")]
    source: Option<String>,

    /// Emit the SQLite schema
    #[arg(short = 's')]
    sql: bool,

    /// Diff against an older configuration and emit migration DDL
    #[arg(short = 'd', value_name = "config")]
    diff: Option<PathBuf>,

    /// Parse and link only
    #[arg(short = 'n')]
    noop: bool,

    /// Also emit JSON export routines in the C outputs
    #[arg(short = 'j')]
    json: bool,

    /// Also emit field validators in the C outputs
    #[arg(short = 'v')]
    valids: bool,

    /// Allow destructive statements in the migration
    #[arg(long)]
    destruct: bool,

    /// Configuration file; standard input when omitted
    config: Option<PathBuf>,
}

enum Op {
    Noop,
    Diff,
    Sql,
    Source,
    Header,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn read_input(path: Option<&PathBuf>) -> Result<(String, String)> {
    match path {
        Some(path) => {
            let name = path.display().to_string();
            let text = fs::read_to_string(path).with_context(|| name.clone())?;
            Ok((text, name))
        }
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("<stdin>")?;
            Ok((text, "<stdin>".to_string()))
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let op = if cli.noop {
        Op::Noop
    } else if cli.diff.is_some() {
        Op::Diff
    } else if cli.sql {
        Op::Sql
    } else if cli.source.is_some() {
        Op::Source
    } else {
        Op::Header
    };

    // Open and read everything up front.
    let main_input = read_input(cli.config.as_ref())?;
    let old_input = match &cli.diff {
        Some(path) => Some(read_input(Some(path))?),
        None => None,
    };

    let mut cfg = Config::new();
    let mut old = Config::new();
    let result = build(&mut cfg, &mut old, main_input, old_input, op, cli);
    let mut stderr = io::stderr().lock();
    cfg.diagnostics.drain_to(&mut stderr)?;
    old.diagnostics.drain_to(&mut stderr)?;
    result
}

fn build(
    cfg: &mut Config,
    old: &mut Config,
    main_input: (String, String),
    old_input: Option<(String, String)>,
    op: Op,
    cli: &Cli,
) -> Result<()> {
    if (cli.json || cli.valids) && matches!(op, Op::Sql | Op::Diff) {
        let flag = if cli.json { "-j" } else { "-v" };
        cfg.diagnostics.warn(
            "config",
            None,
            format!("{} meaningless with SQL output", flag),
        );
    }

    parse_config(cfg, &main_input.0, &main_input.1)?;
    parse_link(cfg)?;
    if let Some((text, name)) = &old_input {
        parse_config(old, text, name)?;
        parse_link(old)?;
    }

    let mut stdout = io::stdout().lock();
    match op {
        Op::Noop => {}
        Op::Sql => sql::write_schema(&mut stdout, cfg)?,
        Op::Header => lang_c::write_header(&mut stdout, cfg, cli.json, cli.valids)?,
        Op::Source => {
            let header = cli.source.as_deref().unwrap_or("db.h");
            lang_c::write_source(&mut stdout, cfg, cli.json, cli.valids, header)?;
        }
        Op::Diff => {
            let records = diff::diff(old, cfg);
            let mut diags = Diagnostics::new();
            let result = sqldiff::write_migration(
                &mut stdout,
                old,
                cfg,
                &records,
                cli.destruct,
                &mut diags,
            );
            cfg.diagnostics.append(diags);
            result?;
        }
    }
    stdout.flush()?;
    Ok(())
}
