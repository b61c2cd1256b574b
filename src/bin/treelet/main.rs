//! treelet-bvh CLI - inspect, optimize and pack BVH trees.

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use treelet_bvh::bvh::io::{load_json, save_json};
use treelet_bvh::config::{OptimizerConfig, TREELET_SIZE_RANGE};
use treelet_bvh::pack::worker::FlattenWorker;
use treelet_bvh::prelude::*;
use treelet_bvh::topology::{TopologyCatalog, generate_topologies};

#[cfg(feature = "chrome-trace")]
type TraceGuard = tracing_chrome::FlushGuard;
#[cfg(not(feature = "chrome-trace"))]
type TraceGuard = ();

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }

    let _guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    if let Err(e) = run(&filtered_args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &[&str]) -> Result<()> {
    match args[0] {
        "s" | "stats" => {
            let Some(path) = args.get(1) else {
                bail!("missing file argument\nUsage: treelet-bvh stats <tree.json>");
            };
            cmd_stats(path)
        }
        "o" | "optimize" => {
            let (Some(input), Some(output)) = (args.get(1), args.get(2)) else {
                bail!("missing arguments\nUsage: treelet-bvh optimize <in.json> <out.json> [--config cfg.json] [--stats stats.json]");
            };
            let config = load_config(flag_value(args, "--config"))?;
            cmd_optimize(input, output, config, flag_value(args, "--stats"))
        }
        "p" | "pack" => {
            let (Some(input), Some(output)) = (args.get(1), args.get(2)) else {
                bail!("missing arguments\nUsage: treelet-bvh pack <in.json> <out.bin> [--optimize] [--config cfg.json]");
            };
            let optimize = args.iter().any(|&s| s == "--optimize" || s == "-O");
            let config = optimize
                .then(|| load_config(flag_value(args, "--config")))
                .transpose()?;
            cmd_pack(input, output, config)
        }
        "t" | "topo" => {
            let max = match args.get(1) {
                Some(n) => n.parse::<usize>().with_context(|| format!("invalid leaf count '{n}'"))?,
                None => OptimizerConfig::default().treelet_size,
            };
            cmd_topo(max);
            Ok(())
        }
        "h" | "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        "--version" | "-V" => {
            println!("treelet-bvh {} ({})", env!("CARGO_PKG_VERSION"), env!("TREELET_BUILD_DATE"));
            Ok(())
        }
        // Bare .json file is the same as 'stats'
        path if path.ends_with(".json") => cmd_stats(path),
        other => bail!("unknown command '{other}' (see 'treelet-bvh help')"),
    }
}

fn print_help() {
    println!("treelet-bvh - BVH treelet optimizer and GPU packer");
    println!();
    println!("USAGE:");
    println!("    treelet-bvh [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    s, stats    <tree.json>               Show node/leaf/triangle counts, depth and SAH cost");
    println!("    o, optimize <in.json> <out.json>      Run the treelet optimizer and save the result");
    println!("    p, pack     <in.json> <out.bin>       Flatten into an RGBA32F texture blob");
    println!("    t, topo     [n]                       Show topology counts for 1..=n leaves");
    println!("    h, help                               Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose        Show debug output");
    println!("    -vv, --trace         Show trace output (very verbose)");
    println!("    -q, --quiet          Errors only");
    println!("    --config <file>      Optimizer config (optimize, pack)");
    println!("    -O, --optimize       Optimize before packing (pack)");
    println!("    --stats <file>       Write optimizer statistics as JSON (optimize)");
    println!();
    println!("EXAMPLES:");
    println!("    treelet-bvh stats scene_bvh.json");
    println!("    treelet-bvh optimize scene_bvh.json scene_opt.json");
    println!("    treelet-bvh pack scene_bvh.json scene_bvh.bin --optimize");
    println!("    treelet-bvh topo 7");
    println!();
    println!("NOTES:");
    println!("    - Without --config the per-user config.json is used if present");
    println!("    - RUST_LOG overrides the -v/-q level");
    println!("    - pack writes u32 width, u32 height, then width*height*4 f32 (little-endian)");
}

fn init_tracing(level: &str) -> Option<TraceGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    #[cfg(feature = "chrome-trace")]
    {
        if std::env::var("TREELET_TRACE").ok().as_deref() == Some("1") {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file("trace.json")
                .build();
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt)
                .with(chrome_layer);
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                return None;
            }
            return Some(guard);
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt);
    let _ = tracing::subscriber::set_global_default(subscriber);
    None
}

/// Value following `flag`, if any.
fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|&s| s == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}

fn load_config(path: Option<&str>) -> Result<OptimizerConfig> {
    match path {
        Some(p) => OptimizerConfig::load(p).with_context(|| format!("failed to load config {p}")),
        None => Ok(OptimizerConfig::load_default()),
    }
}

fn load_tree(path: &str) -> Result<Bvh> {
    let bvh = load_json(path).with_context(|| format!("failed to load {path}"))?;
    bvh.validate().with_context(|| format!("{path} is not a valid tree"))?;
    Ok(bvh)
}

fn sah_cost(bvh: &Bvh, config: &OptimizerConfig) -> f32 {
    SahCost::new(config.traversal_cost, config.intersection_cost).subtree_cost(bvh, bvh.root())
}

fn cmd_stats(path: &str) -> Result<()> {
    tracing::info!("Loading tree: {path}");
    let bvh = load_tree(path)?;
    let root = bvh.root();

    println!("Tree: {path}");
    println!("  Nodes:      {}", bvh.reachable_count());
    println!("  Leaves:     {}", bvh.leaf_count(root));
    println!("  Triangles:  {}", bvh.triangle_count(root));
    println!("  Depth:      {}", bvh.depth(root));
    println!("  SAH cost:   {:.3}", sah_cost(&bvh, &OptimizerConfig::default()));

    let optimizer = TreeletOptimizer::new(OptimizerConfig::default());
    println!("  Treelets:   {}", optimizer.identify_treelets(&bvh).len());
    Ok(())
}

/// Optimize in place, printing progress and a summary.
fn optimize(bvh: &mut Bvh, config: OptimizerConfig) -> OptimizerStats {
    let mut optimizer = TreeletOptimizer::new(config);
    let before = optimizer.cost_model().subtree_cost(bvh, bvh.root());
    let mut on_progress = |pct: &str| tracing::info!("optimizing: {pct}");
    optimizer.optimize_bvh(bvh, Some(&mut on_progress));
    let after = optimizer.cost_model().subtree_cost(bvh, bvh.root());

    let stats = optimizer.stats();
    let catalog = optimizer.catalog();
    println!("Optimizer:");
    println!(
        "  Topologies:          {} cached, treelets up to {} leaves",
        catalog.total_entries(),
        catalog.largest_cached().unwrap_or(0)
    );
    println!("  Treelets processed:  {}", stats.treelets_processed);
    println!("  Treelets improved:   {}", stats.treelets_improved);
    println!("  SAH saved:           {:.3} (avg {:.3})", stats.total_sah_improvement, stats.average_sah_improvement());
    println!("  SAH cost:            {before:.3} -> {after:.3}");
    println!("  Time:                {:.2?}", stats.optimization_time);
    stats.clone()
}

fn cmd_optimize(input: &str, output: &str, config: OptimizerConfig, stats_path: Option<&str>) -> Result<()> {
    let mut bvh = load_tree(input)?;
    let stats = optimize(&mut bvh, config);
    save_json(&bvh.compact(), output).with_context(|| format!("failed to write {output}"))?;
    println!("Wrote {output}");

    if let Some(path) = stats_path {
        let json = serde_json::to_string_pretty(&stats)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {path}"))?;
        println!("Wrote {path}");
    }
    Ok(())
}

fn cmd_pack(input: &str, output: &str, config: Option<OptimizerConfig>) -> Result<()> {
    let mut bvh = load_tree(input)?;
    if let Some(config) = config {
        optimize(&mut bvh, config);
    }

    let start = Instant::now();
    let mut worker = FlattenWorker::spawn()?;
    let flat = worker.flatten(bvh)?;
    worker.stop();
    tracing::debug!("flatten took {:.2?}", start.elapsed());

    let file = File::create(Path::new(output)).with_context(|| format!("failed to create {output}"))?;
    let mut out = BufWriter::new(file);
    flat.write_le(&mut out)?;
    out.flush()?;

    println!("Packed {} nodes into {}x{} RGBA32F texture", flat.node_count, flat.width, flat.height);
    println!("Wrote {output} ({} bytes)", 8 + flat.data.len() * 4);
    Ok(())
}

fn cmd_topo(max: usize) {
    let max = max.clamp(1, TREELET_SIZE_RANGE.1);
    let catalog = TopologyCatalog::new(max);

    println!("{:>6}  {:>10}  {}", "leaves", "topologies", "cached");
    for n in 1..=catalog.max_leaves() {
        let cached = if catalog.is_cached(n) { "yes" } else { "no" };
        println!("{n:>6}  {:>10}  {cached}", generate_topologies(n).len());
    }
    println!("Catalog entries: {}", catalog.total_entries());
}
