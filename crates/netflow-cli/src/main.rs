use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use netflow_model::{GraphModel, NetworkData, Role, SolveOptions, SolveResult, Variant};
use netflow_solver::{LpProblem, SolutionStatus};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

/// Exit code for unreadable, malformed or invalid input
const EXIT_INVALID_INPUT: i32 = 4;
/// Exit code for failures unrelated to the input or the solve status
const EXIT_INTERNAL: i32 = 5;

#[derive(Parser)]
#[command(name = "netflow")]
#[command(version, about = "Max-flow and min-cost network problems solved as linear programs", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a network and print the optimal flows
    Solve {
        /// JSON network description
        file: PathBuf,
        /// Which problem to solve
        #[arg(long, value_enum)]
        variant: VariantArg,
        /// Also report a minimum cut (max-flow only)
        #[arg(long)]
        min_cut: bool,
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
        /// Simplex iteration cap
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Wall-clock budget for the solver, in milliseconds
        #[arg(long)]
        time_limit_ms: Option<u64>,
        /// Residual infeasibility accepted at the end of phase 1
        #[arg(long)]
        feasibility_tolerance: Option<f64>,
    },
    /// Validate a network description
    Check {
        /// JSON network description
        file: PathBuf,
    },
    /// Print the linear program generated for a network
    Formulate {
        /// JSON network description
        file: PathBuf,
        #[arg(long, value_enum)]
        variant: VariantArg,
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    MaxFlow,
    MinCost,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::MaxFlow => Variant::MaxFlow,
            VariantArg::MinCost => Variant::MinCost,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Solve {
            file,
            variant,
            min_cut,
            format,
            max_iterations,
            time_limit_ms,
            feasibility_tolerance,
        } => {
            let model = load_model(&file);
            let mut options = SolveOptions {
                max_iterations,
                time_limit: time_limit_ms.map(Duration::from_millis),
                min_cut,
                ..Default::default()
            };
            if let Some(tol) = feasibility_tolerance {
                options.feasibility_tolerance = tol;
            }

            let result = match netflow_model::solve_with(&model, variant.into(), &options) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(EXIT_INVALID_INPUT);
                }
            };

            match format {
                Format::Json => print_json(&result),
                Format::Text => print_result(&result),
            }

            process::exit(exit_code(result.status));
        }
        Commands::Check { file } => {
            let model = load_model(&file);
            let count = |role: Role| model.with_role(role).count();

            println!(
                "OK: {} nodes ({} origins, {} transshipment, {} destinations), {} arcs",
                model.nodes().len(),
                count(Role::Origin),
                count(Role::Transshipment),
                count(Role::Destination),
                model.arcs().len()
            );
            if model.total_supply() > 0.0 || model.total_demand() > 0.0 {
                println!(
                    "Total supply: {}, total demand: {}",
                    model.total_supply(),
                    model.total_demand()
                );
            }
        }
        Commands::Formulate { file, variant, format } => {
            let model = load_model(&file);
            let formulation = match netflow_model::formulate(&model, variant.into()) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(EXIT_INVALID_INPUT);
                }
            };

            match format {
                Format::Json => print_json(&formulation.problem),
                Format::Text => print!("{}", format_problem(&formulation.problem)),
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_model(path: &Path) -> GraphModel {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file: {}", e);
            process::exit(EXIT_INVALID_INPUT);
        }
    };

    match NetworkData::parse_model(&source) {
        Ok(model) => {
            debug!(
                path = %path.display(),
                nodes = model.nodes().len(),
                arcs = model.arcs().len(),
                "loaded network"
            );
            model
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_INVALID_INPUT);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(EXIT_INTERNAL);
        }
    }
}

fn exit_code(status: SolutionStatus) -> i32 {
    match status {
        SolutionStatus::Optimal => 0,
        SolutionStatus::Infeasible => 1,
        SolutionStatus::Unbounded => 2,
        SolutionStatus::NumericalFailure => 3,
    }
}

fn print_result(result: &SolveResult) {
    println!("Variant: {}", result.variant);
    println!("Status: {}", result.status);
    println!("Iterations: {}", result.iterations);

    let Some(optimum) = &result.optimum else {
        return;
    };

    println!();
    match result.variant {
        Variant::MaxFlow => println!("Maximum flow: {:.2}", optimum.objective),
        Variant::MinCost => println!("Minimum cost: {:.2}", optimum.objective),
    }

    println!();
    println!("Arc flows:");
    for arc in &optimum.flows {
        let label = format!("{} -> {}", arc.tail, arc.head);
        if arc.capacity.is_finite() {
            println!("  {:20} {:10.2} / {:.2}", label, arc.flow, arc.capacity);
        } else {
            println!("  {:20} {:10.2}", label, arc.flow);
        }
    }

    if let Some(cut) = &optimum.min_cut {
        println!();
        println!("Minimum cut (capacity {:.2}):", cut.capacity);
        for (tail, head) in &cut.arcs {
            println!("  {} -> {}", tail, head);
        }
        println!("Source side: {}", cut.source_side.join(", "));
    }

    if !optimum.binding_constraints.is_empty() {
        println!();
        println!("Binding constraints:");
        for name in &optimum.binding_constraints {
            println!("  - {}", name);
        }
    }
}

fn format_problem(problem: &LpProblem) -> String {
    let direction = if problem.objective.minimize { "minimize" } else { "maximize" };
    let mut out = format!(
        "{}: {}\n",
        direction,
        format_terms(problem, &problem.objective.coefficients)
    );

    out.push_str("subject to:\n");
    for c in &problem.constraints {
        out.push_str(&format!(
            "  {}: {} {} {}\n",
            c.name,
            format_terms(problem, &c.coefficients),
            c.op.symbol(),
            c.rhs
        ));
    }

    out.push_str("bounds:\n");
    for v in &problem.variables {
        let line = match (v.lower.is_finite(), v.upper.is_finite()) {
            (true, true) => format!("{} <= {} <= {}", v.lower, v.name, v.upper),
            (true, false) => format!("{} >= {}", v.name, v.lower),
            (false, true) => format!("{} <= {}", v.name, v.upper),
            (false, false) => format!("{} free", v.name),
        };
        out.push_str(&format!("  {}\n", line));
    }

    out
}

fn format_terms(problem: &LpProblem, coefficients: &[f64]) -> String {
    let mut out = String::new();
    for (v, &coef) in problem.variables.iter().zip(coefficients) {
        if coef == 0.0 {
            continue;
        }
        let sign = if coef < 0.0 { "-" } else { "+" };
        if out.is_empty() {
            if coef < 0.0 {
                out.push('-');
            }
        } else {
            out.push_str(&format!(" {} ", sign));
        }
        if coef.abs() != 1.0 {
            out.push_str(&format!("{} ", coef.abs()));
        }
        out.push_str(&v.name);
    }

    if out.is_empty() { "0".to_string() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netflow_model::{Arc, formulate};

    fn chain() -> GraphModel {
        GraphModel::builder()
            .origin("A")
            .transshipment("B")
            .destination("D")
            .arc(Arc::new("A", "B", 10.0))
            .arc(Arc::new("B", "D", 7.0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_format_max_flow_problem() {
        let formulation = formulate(&chain(), Variant::MaxFlow).unwrap();
        let text = format_problem(&formulation.problem);

        assert!(text.starts_with("maximize: y\n"));
        assert!(text.contains("  origin[A]: -x[A,B] + y = 0\n"));
        assert!(text.contains("  transshipment[B]: x[A,B] - x[B,D] = 0\n"));
        assert!(text.contains("  0 <= x[B,D] <= 7\n"));
        assert!(text.contains("  y >= 0\n"));
    }

    #[test]
    fn test_format_terms_with_coefficients() {
        let model = GraphModel::builder()
            .origin("A")
            .destination("D")
            .arc(Arc::new("A", "D", 10.0).with_cost(3.0))
            .build()
            .unwrap();
        let formulation = formulate(&model, Variant::MinCost).unwrap();

        assert_eq!(
            format_terms(&formulation.problem, &formulation.problem.objective.coefficients),
            "3 x[A,D]"
        );
        assert_eq!(format_terms(&formulation.problem, &[0.0]), "0");
        assert_eq!(format_terms(&formulation.problem, &[-2.5]), "-2.5 x[A,D]");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(SolutionStatus::Optimal), 0);
        assert_eq!(exit_code(SolutionStatus::Infeasible), 1);
        assert_eq!(exit_code(SolutionStatus::Unbounded), 2);
        assert_eq!(exit_code(SolutionStatus::NumericalFailure), 3);
    }

    #[test]
    fn test_failure_exit_codes_do_not_alias_statuses() {
        let statuses = [
            SolutionStatus::Optimal,
            SolutionStatus::Infeasible,
            SolutionStatus::Unbounded,
            SolutionStatus::NumericalFailure,
        ];
        for status in statuses {
            assert_ne!(exit_code(status), EXIT_INVALID_INPUT);
            assert_ne!(exit_code(status), EXIT_INTERNAL);
        }
        assert_ne!(EXIT_INVALID_INPUT, EXIT_INTERNAL);
    }
}
