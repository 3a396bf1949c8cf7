use colored::*;
use chainscan_common::config::{Config, StageConfig};

use crate::commands::CommandLine;
use crate::terminal::{colors, print};

type Detail = (String, ColoredString);

pub fn stages(cli: &CommandLine) -> anyhow::Result<()> {
    let cfg: Config = cli.load_config()?;

    print::header("configured stages");
    if cfg.stages.is_empty() {
        print::print_status("no stages configured");
        return Ok(());
    }

    for (idx, stage) in cfg.stages.iter().enumerate() {
        print::tree_head(idx, &stage.name);
        print::as_tree_one_level(stage_details(stage, cfg.tool_timeout_sec));
    }
    print::fat_separator();
    Ok(())
}

fn stage_details(stage: &StageConfig, default_timeout: u64) -> Vec<Detail> {
    let enabled: ColoredString = if stage.is_enabled() {
        "yes".color(colors::ENABLED)
    } else {
        "no".color(colors::DISABLED)
    };
    let produces: ColoredString = if stage.produces_targets {
        "yes".color(colors::ACCENT)
    } else {
        "no".normal()
    };

    vec![
        ("Binary".to_string(), stage.binary.as_str().normal()),
        ("Enabled".to_string(), enabled),
        ("Targets".to_string(), produces),
        (
            "Timeout".to_string(),
            describe_timeout(stage.timeout_sec, default_timeout).normal(),
        ),
        ("Flags".to_string(), stage.flags.join(" ").normal()),
    ]
}

fn describe_timeout(stage: Option<u64>, default: u64) -> String {
    match stage {
        Some(0) => "disabled".to_string(),
        Some(secs) => format!("{secs}s"),
        None if default == 0 => "disabled (default)".to_string(),
        None => format!("{default}s (default)"),
    }
}
