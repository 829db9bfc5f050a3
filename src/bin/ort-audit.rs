//! `ort-audit`: report what a role may see and invoke.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use ort::audit::{audit, write_json, write_script, AuditReport};
use ort::{parse_config, parse_link, Config, Error};

#[derive(Parser)]
#[command(
    name = "ort-audit",
    version,
    about = "Audit role access of an ort configuration"
)]
struct Cli {
    /// Role to audit
    #[arg(short = 'r', long = "role", env = "ORT_ROLE", default_value = "default")]
    role: String,

    /// Emit plain JSON instead of the script-wrapped report
    #[arg(long)]
    json: bool,

    /// Configuration files; standard input when none are given
    configs: Vec<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Read every input before any work begins; nothing below touches the
    // filesystem again.
    let mut inputs = Vec::new();
    if cli.configs.is_empty() {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("<stdin>")?;
        inputs.push((text, "<stdin>".to_string()));
    } else {
        for path in &cli.configs {
            let name = path.display().to_string();
            let text = fs::read_to_string(path).with_context(|| name.clone())?;
            inputs.push((text, name));
        }
    }

    let mut cfg = Config::new();
    let result = build(&mut cfg, &inputs, cli);
    cfg.diagnostics.drain_to(&mut io::stderr().lock())?;
    result
}

fn build(cfg: &mut Config, inputs: &[(String, String)], cli: &Cli) -> Result<()> {
    for (text, name) in inputs {
        parse_config(cfg, text, name)?;
    }
    parse_link(cfg)?;

    if !cfg.roles_enabled() {
        cfg.diagnostics.error("audit", None, "roles not enabled");
        return Err(Error::RolesNotEnabled.into());
    }
    let Some(role) = cfg.find_role(&cli.role) else {
        cfg.diagnostics
            .error("audit", None, format!("role not found: {}", cli.role));
        return Err(Error::RoleNotFound(cli.role.clone()).into());
    };

    let queue = audit(cfg, role);
    let report = AuditReport::new(cfg, role, &queue);

    let mut stdout = io::stdout().lock();
    if cli.json {
        write_json(&mut stdout, &report)?;
    } else {
        write_script(&mut stdout, &report)?;
    }
    stdout.flush()?;
    Ok(())
}
