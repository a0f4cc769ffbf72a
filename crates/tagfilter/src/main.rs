use anyhow::Result;
use log::LevelFilter;
use std::path::Path;
use tagfilter::{cli, Args, Config, FileManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Warnings by default, info for our own crates, unless RUST_LOG is set
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Warn);
        logger.filter_module("tagfilter", LevelFilter::Info);
        logger.filter_module("tagcore", LevelFilter::Info);
    }
    logger.init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, cli::USAGE);
            std::process::exit(2);
        }
    };

    if args.help {
        println!("{}", cli::USAGE);
        return Ok(());
    }

    if let Err(err) = run(args).await {
        eprintln!("tagfilter: {}", err);
        if let Some(source) = err.source() {
            eprintln!("caused by: {}", source);
        }
        log::error!("Filtering failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    if args.init_config {
        let path = match &args.config {
            Some(path) => {
                Config::default().save_to(path).await?;
                path.clone()
            }
            None => Config::default().save().await?,
        };
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_from(path).await?,
        None => Config::load().await?,
    };
    let rules = config.build_rules()?;
    let file_manager = FileManager::new(config.max_input_bytes);

    let mut output = String::new();
    let stdin_only = args.inputs.is_empty();
    let inputs: Vec<&Path> = if stdin_only {
        vec![Path::new("-")]
    } else {
        args.inputs.iter().map(|p| p.as_path()).collect()
    };

    for input in inputs {
        let html = if input == Path::new("-") {
            file_manager.read_stdin().await?
        } else {
            file_manager.read_input(input).await?
        };

        let document = cli::filter_document(&rules, &config.filter, &html);
        log::info!(
            "Filtered {}: {} removals",
            input.display(),
            document.rejections.len()
        );

        if args.report {
            for rejection in &document.rejections {
                eprintln!("{}: {}", input.display(), rejection);
            }
        }
        output.push_str(&document.html);
    }

    file_manager
        .write_output(args.output.as_ref(), &output)
        .await
}
