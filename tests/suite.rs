use std::{fs, io::BufWriter, path::Path};

use shakmaty::{fen::Fen, ByColor, CastlingMode, Chess, Color, EnPassantMode, Position, Role};
use shakmaty_tbs::{
    write_table, Cursor, Generator, Material, Storage, TableDefinition, Tablebase, TbsError,
    Value,
};

fn position(fen: &str) -> Chess {
    fen.parse::<Fen>()
        .unwrap()
        .into_position(CastlingMode::Standard)
        .unwrap()
}

fn generate_placement(
    material: &Material,
    deps: &Tablebase,
    directory: &Path,
    storage: ByColor<Storage>,
) {
    let mut generator = Generator::new(material, deps, storage);
    generator.run().unwrap();
    for color in Color::ALL {
        let path = directory.join(material.with_turn(color).file_name());
        let mut writer = BufWriter::new(fs::File::create(path).unwrap());
        write_table(generator.definition(color), generator.table(color), &mut writer).unwrap();
    }
}

/// Generates `material` together with all capture and promotion targets
/// it depends on, in dependency order.
fn generate_closure(material: &Material, directory: &Path) -> Tablebase {
    let mut placements = Vec::new();
    let mut stack = vec![material.normalized_placement()];
    while let Some(placement) = stack.pop() {
        if !placements.contains(&placement) {
            stack.extend(placement.sub_tables());
            placements.push(placement);
        }
    }
    placements.sort_by_key(|placement| {
        let pawns = placement.side(Color::White).by_role(Role::Pawn)
            + placement.side(Color::Black).by_role(Role::Pawn);
        (placement.count(), pawns)
    });

    let mut tables = Tablebase::new();
    for placement in placements {
        generate_placement(&placement, &tables, directory, ByColor::new_with(|_| Storage::Memory));
        for color in Color::ALL {
            tables
                .add_file(directory.join(placement.with_turn(color).file_name()))
                .unwrap();
        }
    }
    tables
}

fn krvk_tables(directory: &Path) -> Tablebase {
    let material: Material = "KRvK".parse().unwrap();
    generate_placement(&material, &Tablebase::new(), directory, ByColor::new_with(|_| Storage::Memory));
    let mut tables = Tablebase::new();
    assert_eq!(tables.add_directory(directory).unwrap(), 2);
    tables
}

#[test]
fn test_generate_and_probe_krvk() {
    let dir = tempfile::tempdir().unwrap();
    let tables = krvk_tables(dir.path());

    // Back rank mate.
    assert_eq!(
        tables.probe(&position("k7/2K5/8/8/8/8/8/R7 b - - 0 1")).unwrap(),
        Value::MATE
    );
    assert_eq!(
        tables.probe(&position("k7/2K5/8/8/8/8/8/1R6 w - - 0 1")).unwrap(),
        Value::win_in(1)
    );
    // Stalemate in the corner.
    assert_eq!(
        tables.probe(&position("k7/8/K7/8/8/8/8/1R6 b - - 0 1")).unwrap(),
        Value::DRAW
    );
    // KRvK is won from every quiet position with the rook safe.
    let value = tables
        .probe(&position("8/8/8/3k4/8/8/8/K6R w - - 0 1"))
        .unwrap();
    assert!(value.is_win());
}

#[test]
fn test_mirror_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let tables = krvk_tables(dir.path());

    // Only the white rook tables exist on disk, the black rook probe
    // goes through the mirrored orientation.
    let value = tables
        .probe(&position("k6r/8/8/8/3K4/8/8/8 b - - 0 1"))
        .unwrap();
    assert!(value.is_win());

    let mirrored = tables
        .probe(&position("8/8/8/3k4/8/8/8/K6R w - - 0 1"))
        .unwrap();
    assert_eq!(value, mirrored);
}

/// Every value must equal the best value over all legal moves, with
/// checkmates and stalemates graded directly. This re-derives the
/// defining equation of the tables from the finished files alone.
#[test]
fn test_krvk_values_are_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let tables = krvk_tables(dir.path());
    let material: Material = "KRvK".parse().unwrap();

    for color in Color::ALL {
        let definition = TableDefinition::new(&material.with_turn(color));
        let mut cursor = Cursor::new(&definition);
        while cursor.is_valid() {
            if let Some(pos) = definition.checked_position(cursor.setup()) {
                let value = tables.probe(&pos).unwrap();
                assert_eq!(value, expected_value(&tables, &pos));
            }
            cursor.advance();
        }
    }
}

fn expected_value(tables: &Tablebase, pos: &Chess) -> Value {
    let moves = pos.legal_moves();
    if moves.is_empty() {
        return if pos.is_check() {
            Value::MATE
        } else {
            Value::DRAW
        };
    }
    let mut best = Value::MATE;
    for m in &moves {
        let mut successor = pos.clone();
        successor.play_unchecked(m);
        best = best.max(tables.probe(&successor).unwrap().opposite());
    }
    best
}

#[test]
fn test_generate_and_probe_kpvk() {
    let dir = tempfile::tempdir().unwrap();
    let material: Material = "KPvK".parse().unwrap();
    let tables = generate_closure(&material, dir.path());

    // Promotion mate.
    assert_eq!(
        tables.probe(&position("k7/2P5/1K6/8/8/8/8/8 w - - 0 1")).unwrap(),
        Value::win_in(1)
    );
    // The defended pawn on the seventh stalemates the cornered king.
    assert_eq!(
        tables.probe(&position("k7/P7/1K6/8/8/8/8/8 b - - 0 1")).unwrap(),
        Value::DRAW
    );
    // The undefended pawn falls and bare kings are drawn.
    assert_eq!(
        tables.probe(&position("8/8/8/8/8/2k5/2P5/K7 b - - 0 1")).unwrap(),
        Value::DRAW
    );
}

/// Same re-derivation as the rook check, for a table with pawn pushes,
/// promotions into sub tables and only the horizontal symmetry.
#[test]
fn test_kpvk_values_are_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let material: Material = "KPvK".parse().unwrap();
    let tables = generate_closure(&material, dir.path());

    for color in Color::ALL {
        let definition = TableDefinition::new(&material.with_turn(color));
        let mut cursor = Cursor::new(&definition);
        while cursor.is_valid() {
            if let Some(pos) = definition.checked_position(cursor.setup()) {
                let value = tables.probe(&pos).unwrap();
                assert_eq!(value, expected_value(&tables, &pos));
            }
            cursor.advance();
        }
    }
}

/// Pawns on both sides bring en passant into play. The full index space
/// is too large to re-derive exhaustively here, so sample it with a
/// stride and make sure the sample reaches the en passant positions.
#[test]
fn test_kpvkp_sampled_values_are_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let material: Material = "KPvKP".parse().unwrap();
    let tables = generate_closure(&material, dir.path());

    // After a double push the capture must be part of the best value.
    let ep = position("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 2");
    assert_eq!(tables.probe(&ep).unwrap(), expected_value(&tables, &ep));

    for color in Color::ALL {
        let definition = TableDefinition::new(&material.with_turn(color));
        let mut checked = 0;
        let mut ep_checked = 0;
        let mut index = 0;
        while index < definition.index_count() {
            let cursor = Cursor::at(&definition, index);
            if let Some(pos) = definition.checked_position(cursor.setup()) {
                let value = tables.probe(&pos).unwrap();
                assert_eq!(value, expected_value(&tables, &pos));
                checked += 1;
                if pos.ep_square(EnPassantMode::PseudoLegal).is_some() {
                    ep_checked += 1;
                }
            }
            index += 137;
        }
        assert!(checked > 0);
        assert!(ep_checked > 0);
    }
}

#[test]
fn test_disk_staging_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let material: Material = "KQvK".parse().unwrap();

    let memory_dir = dir.path().join("memory");
    let disk_dir = dir.path().join("disk");
    fs::create_dir_all(&memory_dir).unwrap();
    fs::create_dir_all(&disk_dir).unwrap();

    generate_placement(&material, &Tablebase::new(), &memory_dir, ByColor::new_with(|_| Storage::Memory));
    generate_placement(
        &material,
        &Tablebase::new(),
        &disk_dir,
        ByColor::new_with(|color| Storage::Disk {
            directory: staging.path().to_path_buf(),
            stem: material.with_turn(color).file_name(),
        }),
    );

    for color in Color::ALL {
        let name = material.with_turn(color).file_name();
        let memory = fs::read(memory_dir.join(&name)).unwrap();
        let disk = fs::read(disk_dir.join(&name)).unwrap();
        assert_eq!(memory, disk, "{name}");
    }
}

#[test]
fn test_corrupted_file_detected() {
    let dir = tempfile::tempdir().unwrap();
    let tables = krvk_tables(dir.path());
    drop(tables);

    // Flip a bit somewhere in the coded blocks of the white table.
    let material: Material = "KRvK w".parse().unwrap();
    let path = dir.path().join(material.file_name());
    let mut bytes = fs::read(&path).unwrap();
    let target = bytes.len() - 100;
    bytes[target] ^= 0x10;
    fs::write(&path, &bytes).unwrap();

    let mut tables = Tablebase::new();
    tables.add_directory(dir.path()).unwrap();

    let definition = TableDefinition::new(&material);
    let mut corrupted = 0;
    let mut cursor = Cursor::new(&definition);
    while cursor.is_valid() {
        if let Some(pos) = definition.checked_position(cursor.setup()) {
            if matches!(tables.probe(&pos), Err(TbsError::ProbeFailed { .. })) {
                corrupted += 1;
            }
        }
        cursor.advance();
    }
    assert!(corrupted > 0);
}
