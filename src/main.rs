use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_python_tree_toolkit::acr::{ParsimonyAlgorithm, annotate, reconstruct};
use rust_python_tree_toolkit::compare::{compare_edges, compare_trees};
use rust_python_tree_toolkit::consensus::{ConsensusConfig, consensus};
use rust_python_tree_toolkit::distances::{Metric, build_snapshots, pairwise_matrix};
use rust_python_tree_toolkit::error::{ErrorKind, Result, TreeError};
use rust_python_tree_toolkit::io::{read_tip_states, read_tree, stream_file, write_matrix_tsv, write_text, write_trees};
use rust_python_tree_toolkit::random;
use rust_python_tree_toolkit::rearrangement::nni_moves;
use rust_python_tree_toolkit::stream::{DEFAULT_QUEUE_SIZE, read_all};
use rust_python_tree_toolkit::support::{CancelToken, SupportConfig, SupportMethod, compute_support};
use rust_python_tree_toolkit::tree::Tree;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

/// Phylogenetic tree toolkit: branch supports, consensus, comparisons,
/// rerooting, rearrangements and ancestral states.
#[derive(Parser, Debug)]
#[command(name = "tree-toolkit", version, about = "Phylogenetic tree toolkit")]
struct Cli {
    /// Quiet mode: only warnings and errors are logged (RUST_LOG overrides)
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Branch supports of a reference tree from bootstrap trees
    Support(SupportArgs),
    /// Majority-rule or strict consensus of a set of trees
    Consensus(ConsensusArgs),
    /// Compare trees or edges
    #[command(subcommand)]
    Compare(CompareCommand),
    /// Place the root of a tree
    #[command(subcommand)]
    Reroot(RerootCommand),
    /// Every tree one NNI away from the input tree
    Nni(InOut),
    /// Ancestral states by parsimony
    Acr(AcrArgs),
    /// Random trees
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct InOut {
    /// Input tree file (Newick or NEXUS, optionally .gz; `-` for stdin)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path (`-` for stdout, `.gz` to compress)
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SupportArg {
    /// Transfer bootstrap expectation
    Tbe,
    /// Felsenstein bootstrap proportion
    Fbp,
}

#[derive(Args, Debug)]
struct SupportArgs {
    #[arg(value_enum)]
    method: SupportArg,

    /// Reference tree
    #[arg(short = 'i', long = "reference")]
    reference: PathBuf,

    /// Bootstrap trees
    #[arg(short = 'b', long = "bootstrap")]
    bootstrap: PathBuf,

    /// Output path for the reference tree with supports
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,

    /// Worker threads (0: one per core)
    #[arg(short = 't', long = "threads", default_value_t = 0)]
    threads: usize,

    /// Bootstrap trees buffered ahead of the workers
    #[arg(long = "queue-size", default_value_t = DEFAULT_QUEUE_SIZE)]
    queue_size: usize,

    /// Write per-taxon transfer indices (TBE only) to this TSV file
    #[arg(long = "taxa-output")]
    taxa_output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConsensusArgs {
    #[command(flatten)]
    io: InOut,

    /// Minimum bipartition frequency, within [0.5, 1]
    #[arg(short = 'c', long = "cutoff", default_value_t = 0.5)]
    cutoff: f64,
}

#[derive(Subcommand, Debug)]
enum CompareCommand {
    /// Shared and specific bipartitions of every compared tree
    Trees {
        #[arg(short = 'i', long = "reference")]
        reference: PathBuf,
        #[arg(short = 'c', long = "compared")]
        compared: PathBuf,
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,
    },
    /// Every reference edge looked up in the first compared tree
    Edges {
        #[arg(short = 'i', long = "reference")]
        reference: PathBuf,
        #[arg(short = 'c', long = "compared")]
        compared: PathBuf,
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,
    },
    /// Pairwise distance matrix (TSV)
    Matrix {
        #[command(flatten)]
        io: InOut,

        /// Distance metric to compute: rf | weighted | kf
        #[arg(long = "metric", value_enum, default_value_t = MetricArg::Rf)]
        metric: MetricArg,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg {
    Rf,
    Weighted,
    Kf,
}

impl From<MetricArg> for Metric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Rf => Metric::Rf,
            MetricArg::Weighted => Metric::Weighted,
            MetricArg::Kf => Metric::Kf,
        }
    }
}

#[derive(Subcommand, Debug)]
enum RerootCommand {
    /// Root on the branch leading to the given tips
    Outgroup {
        #[command(flatten)]
        io: InOut,

        /// Outgroup tip names, comma separated
        #[arg(short = 'l', long = "tips", value_delimiter = ',', required = true)]
        tips: Vec<String>,
    },
    /// Root at the middle of the longest tip-to-tip path
    Midpoint(InOut),
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AlgorithmArg {
    Acctran,
    Deltran,
    Downpass,
}

#[derive(Args, Debug)]
struct AcrArgs {
    #[command(flatten)]
    io: InOut,

    /// Tip states, one `tip<TAB>state` per line
    #[arg(short = 's', long = "states")]
    states: PathBuf,

    #[arg(short = 'a', long = "algorithm", value_enum, default_value_t = AlgorithmArg::Deltran)]
    algorithm: AlgorithmArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModelArg {
    Yule,
    Uniform,
    Caterpillar,
    Balanced,
    Star,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(short = 'm', long = "model", value_enum, default_value_t = ModelArg::Yule)]
    model: ModelArg,

    /// Number of tips (depth for balanced trees: 2^depth tips)
    #[arg(short = 'n', long = "tips", default_value_t = 10)]
    tips: usize,

    /// Number of trees
    #[arg(long = "count", default_value_t = 1)]
    count: usize,

    #[arg(long = "rooted", default_value_t = false)]
    rooted: bool,

    #[arg(long = "seed")]
    seed: Option<u64>,

    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &TreeError) -> u8 {
    match e.kind() {
        ErrorKind::Input => 2,
        ErrorKind::Structural => 3,
        ErrorKind::Stream => 4,
        ErrorKind::Precondition => 5,
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Support(args) => run_support(args),
        Command::Consensus(args) => {
            let t0 = Instant::now();
            let stream = stream_file(&args.io.input, DEFAULT_QUEUE_SIZE)?;
            let tree = consensus(stream, ConsensusConfig { cutoff: args.cutoff })?;
            info!("Consensus {:.3}s", t0.elapsed().as_secs_f64());
            write_trees(&args.io.output, &[tree])
        }
        Command::Compare(cmd) => run_compare(cmd),
        Command::Reroot(RerootCommand::Outgroup { io, tips }) => {
            let mut tree = read_tree(&io.input)?;
            tree.reroot_outgroup(&tips)?;
            write_trees(&io.output, &[tree])
        }
        Command::Reroot(RerootCommand::Midpoint(io)) => {
            let mut tree = read_tree(&io.input)?;
            tree.reroot_midpoint()?;
            write_trees(&io.output, &[tree])
        }
        Command::Nni(io) => {
            let mut tree = read_tree(&io.input)?;
            let moves = nni_moves(&tree);
            let mut neighbors = Vec::with_capacity(moves.len());
            for m in &moves {
                m.apply(&mut tree)?;
                neighbors.push(tree.clone());
                m.undo(&mut tree)?;
            }
            info!("{} NNI neighbors", neighbors.len());
            write_trees(&io.output, &neighbors)
        }
        Command::Acr(args) => {
            let mut tree = read_tree(&args.io.input)?;
            let states = read_tip_states(&args.states)?;
            let algorithm = match args.algorithm {
                AlgorithmArg::Acctran => ParsimonyAlgorithm::Acctran,
                AlgorithmArg::Deltran => ParsimonyAlgorithm::Deltran,
                AlgorithmArg::Downpass => ParsimonyAlgorithm::Downpass,
            };
            let rec = reconstruct(&tree, &states, algorithm)?;
            info!("Parsimony cost {}", rec.cost);
            annotate(&mut tree, &rec)?;
            write_trees(&args.io.output, &[tree])
        }
        Command::Generate(args) => run_generate(args),
    }
}

fn run_support(args: SupportArgs) -> Result<()> {
    let method = match args.method {
        SupportArg::Tbe => SupportMethod::Transfer,
        SupportArg::Fbp => SupportMethod::Felsenstein,
    };
    let config = SupportConfig {
        threads: args.threads,
        queue_size: args.queue_size,
        transfer_details: args.taxa_output.is_some(),
    };
    let mut reference = read_tree(&args.reference)?;
    let stream = stream_file(&args.bootstrap, config.queue_size)?;

    let t0 = Instant::now();
    let report = compute_support(&mut reference, stream, method, &config, &CancelToken::new())?;
    info!("Supports from {} bootstrap trees {:.3}s", report.replicates, t0.elapsed().as_secs_f64());

    if let (Some(path), Some(taxa)) = (&args.taxa_output, &report.taxa) {
        let mut text = String::from("taxon\ttransfer_index\n");
        for t in taxa {
            text.push_str(&format!("{}\t{}\n", t.name, t.index));
        }
        write_text(path, &text)?;
    }
    write_trees(&args.output, &[reference])
}

fn run_compare(cmd: CompareCommand) -> Result<()> {
    match cmd {
        CompareCommand::Trees { reference, compared, output } => {
            let mut reference = read_tree(&reference)?;
            let stream = stream_file(&compared, DEFAULT_QUEUE_SIZE)?;
            let mut text = String::from("tree\tcommon\treference_specific\tcompared_specific\trf\n");
            for c in compare_trees(&mut reference, stream)? {
                text.push_str(&format!(
                    "{}\t{}\t{}\t{}\t{}\n",
                    c.id, c.common, c.reference_specific, c.compared_specific, c.rf
                ));
            }
            write_text(&output, &text)
        }
        CompareCommand::Edges { reference, compared, output } => {
            let mut reference = read_tree(&reference)?;
            let mut other = read_tree(&compared)?;
            let mut text = String::from("edge\tdepth\tfound\ttransfer\n");
            for c in compare_edges(&mut reference, &mut other)? {
                text.push_str(&format!("{}\t{}\t{}\t{}\n", c.edge, c.depth, c.found, c.transfer));
            }
            write_text(&output, &text)
        }
        CompareCommand::Matrix { io, metric } => {
            let t0 = Instant::now();
            let mut trees: Vec<Tree> = read_all(stream_file(&io.input, DEFAULT_QUEUE_SIZE)?)?;
            info!("Reading {} trees {:.3}s", trees.len(), t0.elapsed().as_secs_f64());
            let t1 = Instant::now();
            let snapshots = build_snapshots(&mut trees)?;
            let metric = Metric::from(metric);
            let matrix = pairwise_matrix(&snapshots, metric)?;
            info!("Determining distances using {} {:.3}s", metric.label(), t1.elapsed().as_secs_f64());
            let names: Vec<String> = (0..trees.len()).map(|i| format!("tree_{i}")).collect();
            write_matrix_tsv(&io.output, &names, &matrix)
        }
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let trees = (0..args.count)
        .map(|_| -> Result<Tree> {
            match args.model {
                ModelArg::Yule => random::yule(args.tips, args.rooted, &mut rng),
                ModelArg::Uniform => random::uniform(args.tips, args.rooted, &mut rng),
                ModelArg::Caterpillar => random::caterpillar(args.tips, args.rooted, &mut rng),
                ModelArg::Balanced => {
                    let depth = u32::try_from(args.tips)
                        .map_err(|_| TreeError::InvalidArgument(format!("depth {}", args.tips)))?;
                    random::balanced(depth, args.rooted, &mut rng)
                }
                ModelArg::Star => random::star(args.tips, &mut rng),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    write_trees(&args.output, &trees)
}
