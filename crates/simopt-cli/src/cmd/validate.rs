use crate::reports;
use clap::Args;
use simopt_core::config::Config;
use simopt_core::model::{ModelDefinition, VariableContainer};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: Config,

    /// Only list variables whose name contains this text
    #[arg(short, long)]
    pub filter: Option<String>,
}

/// Both the model and the config already passed their checks in `main`;
/// this prints what a run would start from.
pub fn run(
    args: ValidateArgs,
    config: Config,
    definition: &ModelDefinition,
    model: &VariableContainer,
) {
    println!(
        "\n🔎 === MODEL AUDIT: {} === 🔎",
        if definition.name.is_empty() {
            "(unnamed)"
        } else {
            &definition.name
        }
    );

    reports::print_variable_table(model, args.filter.as_deref());
    reports::print_config_table(&config);
    println!(
        "Sync fingerprint: {}",
        model.sync_object().fingerprint()
    );
    println!("✅ Model and configuration are valid.");
}
