use anyhow::Context as _;
use anyhow::Result;
use std::env;
use std::io;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::Registry;
use tracing_tree::HierarchicalLayer;

const USAGE: &str = "Usage: ghost-part [options] <in.edges >out.part";

const STRATEGIES: &str = "
STRATEGIES:
    stay            Keep nodes on the rank that reads them
    block           Split global node indices in contiguous ranges
    cyclic          Deal global node indices to ranks in turn
    random[,SEED]   Send nodes to random ranks (default seed: 0)

EXCHANGES:
    round-robin     Ranks append ghost destinations one after the other
    all-to-all      Ranks send ghost destinations to the node's home rank
";

fn main() -> Result<()> {
    let mut options = getopts::Options::new();
    options.optflag("h", "help", "print this help menu");
    options.optopt(
        "a",
        "strategy",
        "partition strategy, see STRATEGIES (default: block)",
        "NAME",
    );
    options.optopt(
        "p",
        "ranks",
        "number of in-process ranks (default: 1)",
        "COUNT",
    );
    options.optopt("t", "trace", "emit a chrome trace", "FILE");
    options.optopt(
        "x",
        "exchange",
        "ghost exchange protocol, see EXCHANGES (default: round-robin)",
        "NAME",
    );

    let matches = options.parse(env::args().skip(1))?;

    if matches.opt_present("h") {
        eprintln!("{}", options.usage(USAGE));
        eprint!("{STRATEGIES}");
        return Ok(());
    }
    if !matches.free.is_empty() {
        anyhow::bail!("too many arguments\n\n{}", options.usage(USAGE));
    }

    let registry = Registry::default().with(EnvFilter::from_env("LOG")).with(
        HierarchicalLayer::new(4)
            .with_thread_ids(true)
            .with_targets(true)
            .with_bracketed_fields(true),
    );
    let _chrome_trace_guard = match matches.opt_str("t") {
        Some(filename) => {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file(filename)
                .build();
            registry.with(chrome_layer).init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    };

    let strategy: partage_tools::Strategy = matches
        .opt_get("a")
        .context("invalid value for option 'strategy'")?
        .unwrap_or(partage_tools::Strategy::Block);

    let size: usize = matches
        .opt_get("p")
        .context("invalid value for option 'ranks'")?
        .unwrap_or(1);

    let exchange = match matches.opt_str("x") {
        Some(name) => {
            partage_tools::parse_exchange(&name).context("invalid value for option 'exchange'")?
        }
        None => partage::GhostExchange::default(),
    };

    let stdin = io::stdin();
    let stdin = stdin.lock();
    let graph = partage_tools::read_edge_list(stdin).context("failed to read edge list")?;
    tracing::info!(nodes = graph.nodes, edges = graph.edges.len(), "read edge list");

    let partition = partage_tools::partition(&graph, size, strategy, exchange)?;

    let stdout = io::stdout();
    let stdout = stdout.lock();
    let stdout = io::BufWriter::new(stdout);
    partage_tools::write(stdout, &graph, &partition).context("failed to print partition")?;

    Ok(())
}
