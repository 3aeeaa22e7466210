use std::{
    error::Error,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use rustc_hash::FxHashSet;
use shakmaty::{fen::Fen, ByColor, CastlingMode, Chess, Color, Role};
use shakmaty_tbs::{write_table, Generator, Material, Storage, Tablebase};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Generate and probe .tbs endgame tables", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate tables for a material signature and everything it
    /// depends on.
    Generate {
        /// Material signature, e.g. KQvKR.
        material: Material,

        /// Directory for the finished table files.
        #[arg(long, default_value = "tables")]
        directory: PathBuf,

        /// Stage intermediate generations in this directory instead of
        /// keeping them in memory.
        #[arg(long)]
        staging: Option<PathBuf>,
    },
    /// Look up the value of a position.
    Probe {
        /// Position in FEN notation.
        fen: Fen,

        /// Directory with table files.
        #[arg(long, default_value = "tables")]
        directory: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if args.verbose { "debug" } else { "info" })
        }))
        .init();

    match args.command {
        Command::Generate {
            material,
            directory,
            staging,
        } => generate(&material, &directory, staging.as_deref()),
        Command::Probe { fen, directory } => probe(fen, &directory),
    }
}

fn generate(
    material: &Material,
    directory: &Path,
    staging: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(directory)?;
    if let Some(staging) = staging {
        std::fs::create_dir_all(staging)?;
    }

    let mut placements: Vec<Material> = dependency_closure(material).into_iter().collect();
    // Captures shed a piece and promotions shed a pawn, so this order
    // generates every table after the tables it probes.
    placements.sort_by_key(|placement| (placement.count(), pawn_count(placement)));

    let mut tables = Tablebase::new();
    for placement in placements {
        let paths = ByColor::new_with(|color| {
            directory.join(placement.with_turn(color).file_name())
        });
        if Color::ALL.iter().all(|&color| paths.get(color).exists()) {
            info!(material = %placement, "already generated");
        } else {
            let storage = ByColor::new_with(|color| match staging {
                None => Storage::Memory,
                Some(staging) => Storage::Disk {
                    directory: staging.to_path_buf(),
                    stem: stem_of(&placement.with_turn(color).file_name()),
                },
            });
            let mut generator = Generator::new(&placement, &tables, storage);
            generator.run()?;
            for color in Color::ALL {
                let file = File::create(paths.get(color))?;
                let mut writer = BufWriter::new(file);
                write_table(generator.definition(color), generator.table(color), &mut writer)?;
                writer.flush()?;
                info!(path = %paths.get(color).display(), "written");
            }
        }
        for color in Color::ALL {
            tables.add_file(paths.get(color))?;
        }
    }
    Ok(())
}

fn probe(fen: Fen, directory: &Path) -> Result<(), Box<dyn Error>> {
    let mut tables = Tablebase::new();
    let added = tables.add_directory(directory)?;
    info!(added, path = %directory.display(), "tables registered");

    let pos: Chess = fen.into_position(CastlingMode::Standard)?;
    let value = tables.probe(&pos)?;
    println!("{value}");
    Ok(())
}

fn dependency_closure(material: &Material) -> FxHashSet<Material> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![material.normalized_placement()];
    while let Some(placement) = stack.pop() {
        if seen.insert(placement.clone()) {
            stack.extend(placement.sub_tables());
        }
    }
    seen
}

fn pawn_count(material: &Material) -> u8 {
    material.side(Color::White).by_role(Role::Pawn)
        + material.side(Color::Black).by_role(Role::Pawn)
}

fn stem_of(file_name: &str) -> String {
    file_name.strip_suffix(".tbs").unwrap_or(file_name).to_owned()
}
