#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

use logregr::config::{Method, RegressionConfig};
use logregr::data::{load_observations, partition_round_robin};
use logregr::diagnostics::{LogisticFitResult, MarginalEffectsResult, RobustVarianceResult};
use logregr::driver::{FitReport, Observation, fit, marginal_effects, robust_variance};
use logregr::state::IterativeState;
use logregr::{CgState, IgdState, IrlsState};

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodCli {
    Cg,
    Irls,
    Igd,
}

impl From<MethodCli> for Method {
    fn from(method: MethodCli) -> Self {
        match method {
            MethodCli::Cg => Method::Cg,
            MethodCli::Irls => Method::Irls,
            MethodCli::Igd => Method::Igd,
        }
    }
}

#[derive(Args)]
pub struct FitArgs {
    /// Path to a CSV file whose first column is the 0/1 label
    pub data: PathBuf,

    /// TOML run configuration; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub method: Option<MethodCli>,

    /// Number of round-robin partitions folded in parallel
    #[arg(long, value_name = "N")]
    pub partitions: Option<usize>,

    #[arg(long)]
    pub max_iterations: Option<usize>,

    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Also report sandwich standard errors for the fitted coefficients
    #[arg(long)]
    pub robust: bool,

    /// Also report average marginal effects
    #[arg(long)]
    pub marginal: bool,
}

#[derive(Parser)]
#[command(
    name = "logregr",
    about = "Fit logistic regression over partitioned data with sufficient-statistics aggregates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model and print the coefficient table
    Fit(FitArgs),

    /// Write the default configuration to a TOML file
    InitConfig {
        /// Destination of the config file
        path: PathBuf,
    },
}

fn resolve_config(args: &FitArgs) -> Result<RegressionConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RegressionConfig::load(path)?,
        None => RegressionConfig::default(),
    };
    if let Some(method) = args.method {
        config.method = method.into();
    }
    if let Some(partitions) = args.partitions {
        config.partitions = partitions;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance = tolerance;
    }
    config.robust |= args.robust;
    config.marginal |= args.marginal;
    config.validate()?;
    Ok(config)
}

fn run_fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(&args)?;
    println!("Loading observations from: {}", args.data.display());
    let observations = load_observations(&args.data)?;
    let partitions = partition_round_robin(observations, config.partitions);

    println!(
        "Fitting with {} over {} partition(s)",
        config.method,
        partitions.len()
    );
    match config.method {
        Method::Cg => fit_and_report::<CgState>(&partitions, &config),
        Method::Irls => fit_and_report::<IrlsState>(&partitions, &config),
        Method::Igd => fit_and_report::<IgdState>(&partitions, &config),
    }
}

fn fit_and_report<S>(
    partitions: &[Vec<Observation>],
    config: &RegressionConfig,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: IterativeState<Output = LogisticFitResult> + Send + Sync,
{
    let report: FitReport<S> = fit(partitions, &config.fit_options())?;
    println!(
        "Stopped after {} iteration(s) with status {:?} (code {})",
        report.iterations,
        report.status(),
        report.status().code()
    );

    let Some(output) = &report.output else {
        return Err("the fit terminated before any observation was folded".into());
    };
    print_fit_table(output);

    let coef = report.state.coef();
    if config.robust {
        if let Some(robust) = robust_variance(partitions, coef)? {
            print_robust_table(&robust);
        }
    }
    if config.marginal {
        if let Some(marginal) = marginal_effects(partitions, coef)? {
            print_marginal_table(&marginal);
        }
    }
    Ok(())
}

fn print_fit_table(output: &LogisticFitResult) {
    println!();
    println!("Log-likelihood: {:.6}", output.log_likelihood);
    println!("Condition number: {:.4e}", output.condition_no);
    println!(
        "{:>6} {:>14} {:>14} {:>10} {:>12} {:>12}",
        "coef", "estimate", "std. error", "z", "Pr(>|z|)", "odds ratio"
    );
    for i in 0..output.coef.len() {
        println!(
            "{:>6} {:>14.6} {:>14.6} {:>10.4} {:>12.4e} {:>12.6}",
            i,
            output.coef[i],
            output.std_err[i],
            output.wald_z_stats[i],
            output.wald_p_values[i],
            output.odds_ratios[i]
        );
    }
}

fn print_robust_table(output: &RobustVarianceResult) {
    println!();
    println!("Robust (sandwich) standard errors");
    println!(
        "{:>6} {:>14} {:>14} {:>10} {:>12}",
        "coef", "estimate", "std. error", "z", "Pr(>|z|)"
    );
    for i in 0..output.coef.len() {
        println!(
            "{:>6} {:>14.6} {:>14.6} {:>10.4} {:>12.4e}",
            i, output.coef[i], output.std_err[i], output.wald_z_stats[i], output.wald_p_values[i]
        );
    }
}

fn print_marginal_table(output: &MarginalEffectsResult) {
    println!();
    println!("Average marginal effects");
    println!(
        "{:>6} {:>14} {:>14} {:>10} {:>12}",
        "coef", "effect", "std. error", "t", "Pr(>|t|)"
    );
    let p_value = |i: usize| -> String {
        match &output.p_values {
            Some(values) => format!("{:.4e}", values[i]),
            None => "-".to_string(),
        }
    };
    for i in 0..output.coef.len() {
        println!(
            "{:>6} {:>14.6} {:>14.6} {:>10.4} {:>12}",
            i,
            output.marginal_effects[i],
            output.std_err[i],
            output.t_stats[i],
            p_value(i)
        );
    }
    if output.p_values.is_none() {
        println!("p-values withheld: not more rows than coefficients");
    }
}

fn init_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    RegressionConfig::default().save(&path)?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Fit(args) => run_fit(args),
        Commands::InitConfig { path } => init_config(path),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
