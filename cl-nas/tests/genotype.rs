use cl_nas::arch::CellKind;
use cl_nas::cell::NasNetPreset;
use cl_nas::genotype::{Block, Genotype, GenotypeError};
use cl_nas::ops::CellOp;

#[test]
fn presets_are_valid() {
    for preset in NasNetPreset::ALL {
        let genotype = preset.genotype();
        assert_eq!(genotype.validate(), Ok(()), "{:?}", preset);
        assert_eq!(preset.name().parse::<NasNetPreset>().unwrap(), preset);
    }

    assert_eq!("nasnet-a".parse::<NasNetPreset>().unwrap(), NasNetPreset::NasNetA);
    assert!("resnet".parse::<NasNetPreset>().is_err());
}

#[test]
fn op_names() {
    for op in CellOp::ALL {
        assert_eq!(op.to_string().parse::<CellOp>(), Ok(op));
    }

    assert_eq!("1x77x1".parse::<CellOp>(), Ok(CellOp::Conv1x77x1));
    assert_eq!(
        "conv9x9".parse::<CellOp>(),
        Err(GenotypeError::UnknownOp("conv9x9".to_owned()))
    );
}

#[test]
fn parse_blocks() {
    let blocks = Genotype::parse_blocks("sep3x3:0 id:1\n avg3x3:2 max3x3:1").unwrap();
    assert_eq!(
        blocks,
        vec![
            [Block::new(CellOp::Sep3x3, 0), Block::new(CellOp::Id, 1)],
            [Block::new(CellOp::Avg3x3, 2), Block::new(CellOp::Max3x3, 1)],
        ]
    );

    assert_eq!(
        Genotype::parse_blocks("sep3x3:0 id:1 avg3x3:2"),
        Err(GenotypeError::InvalidBlock("avg3x3:2".to_owned()))
    );
    assert_eq!(
        Genotype::parse_blocks("sep3x3"),
        Err(GenotypeError::InvalidBlock("sep3x3".to_owned()))
    );
    assert_eq!(
        Genotype::parse_blocks("sep3x3:x"),
        Err(GenotypeError::InvalidBlock("sep3x3:x".to_owned()))
    );
    assert_eq!(
        Genotype::parse_blocks("pool:1 id:0"),
        Err(GenotypeError::UnknownOp("pool".to_owned()))
    );
}

#[test]
fn validation_errors() {
    let cell = |s: &str| Genotype::parse_blocks(s).unwrap();

    let future_arg = Genotype::new(cell("id:0 id:2"), vec![2], cell("id:0 id:1"), vec![2]);
    assert_eq!(
        future_arg,
        Err(GenotypeError::InvalidArg {
            kind: CellKind::Normal,
            block: 0,
            arg: 2,
            available: 2,
        })
    );

    let missing_state = Genotype::new(cell("id:0 id:1"), vec![2], cell("id:0 id:1"), vec![2, 3]);
    assert_eq!(
        missing_state,
        Err(GenotypeError::InvalidConcat {
            kind: CellKind::Reduction,
            index: 3,
            available: 3,
        })
    );

    let unreduced = Genotype::new(cell("id:0 id:1"), vec![0, 2], cell("id:0 id:1"), vec![1, 2]);
    assert_eq!(unreduced, Err(GenotypeError::UnreducedConcat(1)));

    let empty = Genotype::new(vec![], vec![], cell("id:0 id:1"), vec![2]);
    assert_eq!(empty, Err(GenotypeError::EmptyCell(CellKind::Normal)));

    let valid = Genotype::new(cell("id:0 id:1 sep3x3:2 avg3x3:0"), vec![0, 3], cell("max3x3:0 max3x3:1"), vec![2]);
    assert!(valid.is_ok());
}

#[test]
fn display() {
    let text = Genotype::darts().to_string();
    assert!(text.starts_with("normal:\n  2 = sep3x3:0 + sep3x3:1\n"));
    assert!(text.contains("  5 = id:0 + dil3x3:2\n  concat [2, 3, 4, 5]\nreduction:\n"));
}
