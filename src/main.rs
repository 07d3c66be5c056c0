use qatprep::activation::ReLU;
use qatprep::nn::{describe, Conv2d, Flatten, LayerDict, Linear, Module, Sequential};
use qatprep::quantization::QuantSettings;
use qatprep::{QATRewriter, QuantConfig, Tensor};
use std::env;
use std::process;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

struct Args {
    config: Option<String>,
    inplace: bool,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let args = parse_args(&args);

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> qatprep::Result<()> {
    qatprep::init()?;

    let config = match &args.config {
        Some(path) => QuantConfig::from_settings(&QuantSettings::load(path)?, &[])?,
        None => QuantConfig::default(),
    };
    let rewriter = QATRewriter::new(&config);

    let mut model = lenet();
    println!("Model:\n{}", describe(&model));

    let prepared: Box<dyn Module> = if args.inplace {
        rewriter.quantize_in_place(&mut model)?;
        Box::new(model)
    } else {
        let prepared = rewriter.quantize(&model)?;
        println!("Original model left untouched:\n{}", describe(&model));
        prepared
    };

    println!("Prepared for QAT:\n{}", describe(prepared.as_ref()));
    println!("Quantization config:\n{}", rewriter);

    let input = Tensor::randn(&[4, 1, 28, 28]);
    let output = prepared.forward(&input);
    println!("Forward pass: {:?} -> {:?}", input.shape(), output.shape());
    Ok(())
}

fn lenet() -> LayerDict {
    LayerDict::new()
        .with(
            "features",
            Box::new(Sequential::new(vec![
                Box::new(Conv2d::new(1, 6, (5, 5), Some((2, 2)), Some((2, 2)), true)),
                Box::new(ReLU),
                Box::new(Conv2d::new(6, 16, (5, 5), Some((2, 2)), None, true)),
                Box::new(ReLU),
            ])),
        )
        .with("flatten", Box::new(Flatten))
        .with(
            "classifier",
            Box::new(Sequential::new(vec![
                Box::new(Linear::new(16 * 5 * 5, 120, true)),
                Box::new(ReLU),
                Box::new(Linear::new(120, 84, true)),
                Box::new(ReLU),
                Box::new(Linear::new(84, 10, true)),
            ])),
        )
}

fn parse_args(args: &[String]) -> Args {
    let mut parsed = Args {
        config: None,
        inplace: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 >= args.len() {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }
                i += 1;
                parsed.config = Some(args[i].clone());
            }
            "--inplace" => parsed.inplace = true,
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Use --help for usage information");
                process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!("Prepare a LeNet-style model for quantization-aware training");
    println!();
    println!("Usage: qatprep [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <FILE>    Load quantization settings from a TOML file");
    println!("      --inplace          Rewrite the model itself instead of a copy");
    println!("  -h, --help             Show this help message");
    println!();
    println!("Set RUST_LOG=debug to see every per-layer decision.");
}
