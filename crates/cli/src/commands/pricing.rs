//! `streamloop pricing`: list the model price table.

use std::path::Path;

use streamloop_config::AppConfig;
use streamloop_telemetry::ModelPricing;

/// List available model pricing, including `[custom_pricing]` from the config.
pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let table = streamloop_providers::pricing_from_config(&config);
    let entries = table.entries();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("─────────────────────────────────────────────────────");
    print!("{}", format_table(&entries));
    println!();
    println!("  {} models with pricing data", entries.len());

    Ok(())
}

fn format_table(entries: &[(String, ModelPricing)]) -> String {
    let mut out = format!("{:<40} {:>10} {:>10}\n", "Model", "Input", "Output");
    out.push_str(&format!("{:<40} {:>10} {:>10}\n", "─────", "─────", "──────"));
    for (name, p) in entries {
        out.push_str(&format!(
            "{:<40} ${:>9.3} ${:>9.3}\n",
            name, p.input_per_m, p.output_per_m
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_each_model() {
        let entries = vec![
            ("anthropic/claude-sonnet-4".to_string(), ModelPricing::new(3.0, 15.0)),
            ("openai/gpt-4o".to_string(), ModelPricing::new(2.5, 10.0)),
        ];
        let table = format_table(&entries);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[2].starts_with("anthropic/claude-sonnet-4"));
        assert!(lines[2].contains("3.000"));
        assert!(lines[2].contains("15.000"));
        assert!(lines[3].contains("2.500"));
    }

    #[test]
    fn custom_pricing_is_listed() {
        let mut config = AppConfig::default();
        config
            .custom_pricing
            .insert("local/llama3".into(), ModelPricing::new(0.0, 0.0));
        let table = streamloop_providers::pricing_from_config(&config);
        assert!(table.entries().iter().any(|(name, _)| name == "local/llama3"));
    }
}
