use gbasm::{
    error::Error,
    program::{Entry, SourceFile},
    FlatRomWriter, LinkOptions, LinkReport, Linker, MacroTable, MemoryLoader, RomWriter,
};

fn link_files(
    loader: &MemoryLoader,
    root: &str,
    options: LinkOptions,
) -> Result<(Vec<SourceFile>, LinkReport), Error> {
    let macros = MacroTable::builtin();
    let mut linker = Linker::new(&macros);
    linker.load(loader, root)?;
    let report = linker.link(&options)?;
    Ok((linker.into_files(), report))
}

fn link(text: &str, options: LinkOptions) -> Result<(Vec<SourceFile>, LinkReport), Error> {
    link_files(&MemoryLoader::new().with_file("main.s", text), "main.s", options)
}

fn section_bytes(file: &SourceFile, section: usize) -> Vec<u8> {
    file.sections[section]
        .entries
        .iter()
        .flat_map(|entry| match entry {
            Entry::Instruction(i) => file.instructions[*i].bytes(),
            Entry::Data(d) => file.data[*d].bytes.clone(),
            Entry::Binary(b) => file.binaries[*b].bytes.clone(),
            Entry::Label(_) | Entry::Variable(_) => Vec::new(),
        })
        .collect()
}

const UNSAFE: LinkOptions = LinkOptions {
    optimize: true,
    unsafe_jumps: true,
};

#[test]
fn loop_resolves_and_shortens() {
    let text = "SECTION \"main\", ROM0[$150]\nLOOP: nop\njp LOOP\n";
    let (files, _) = link(text, LinkOptions::default()).unwrap();
    assert_eq!(files[0].labels[0].offset, 0x150);
    assert_eq!(section_bytes(&files[0], 0), [0x00, 0xC3, 0x50, 0x01]);

    let (files, report) = link(text, UNSAFE).unwrap();
    assert_eq!(section_bytes(&files[0], 0), [0x00, 0x18, 0xFD]);
    assert_eq!(files[0].sections[0].size, 3);
    assert_eq!(report.rewrites, 1);
    assert_eq!(report.passes, 2);
}

#[test]
fn safe_mode_keeps_unconditional_jumps() {
    let text = "SECTION \"main\", ROM0[$150]\nLOOP: nop\njp LOOP\njp nz, LOOP\n";
    let (files, _) = link(text, LinkOptions { optimize: true, unsafe_jumps: false }).unwrap();
    assert_eq!(section_bytes(&files[0], 0), [0x00, 0xC3, 0x50, 0x01, 0x20, 0xFA]);
}

#[test]
fn retargeted_jumps_follow_shrinking_code() {
    let text = "SECTION \"main\", ROM0[$150]\nStart: ld a, [$FF80]\njp nz, Start\nld a, [$FF81]\njp nz, Start\n";
    let (files, report) = link(text, UNSAFE).unwrap();
    assert_eq!(
        section_bytes(&files[0], 0),
        [0xF0, 0x80, 0x20, 0xFC, 0xF0, 0x81, 0x20, 0xF8]
    );
    assert!(report.passes <= 3, "{report:?}");
}

#[test]
fn high_page_loads_reach_a_fixed_point() {
    let text = "SECTION \"main\", ROM0[$150]\nld a, [$FF80]\nld [$FF81], a\n";
    let (files, report) = link(text, UNSAFE).unwrap();
    assert_eq!(section_bytes(&files[0], 0), [0xF0, 0x80, 0xE0, 0x81]);
    assert_eq!(report.rewrites, 2);
    assert_eq!(report.passes, 2);
}

#[test]
fn tail_calls_become_jumps() {
    let text = "SECTION \"main\", ROM0[$150]\nMain: call Helper\nret\nHelper: ret\n";
    let (files, _) = link(text, LinkOptions { optimize: true, unsafe_jumps: false }).unwrap();
    assert_eq!(section_bytes(&files[0], 0), [0xC3, 0x53, 0x01, 0xC9]);
    assert_eq!(files[0].labels[1].offset, 0x153);
}

#[test]
fn local_labels_are_scoped_by_global_labels() {
    let text = "SECTION \"main\", ROM0[$150]\nFirst:\n.loop: nop\njr .loop\nSecond:\nnop\n.loop: nop\njr .loop\n";
    let (files, _) = link(text, LinkOptions::default()).unwrap();
    assert_eq!(
        section_bytes(&files[0], 0),
        [0x00, 0x18, 0xFD, 0x00, 0x00, 0x18, 0xFD]
    );
}

#[test]
fn circular_constants_name_the_chain() {
    let text = "ALPHA EQU BETA\nBETA EQU ALPHA\nSECTION \"main\", ROM0\nld a, ALPHA\n";
    let err = link(text, LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Reference { .. }), "{err}");
    assert!(err.message().contains("ALPHA"), "{err}");
    assert!(err.message().contains("BETA"), "{err}");
}

#[test]
fn overlapping_sections_name_both() {
    let text = "SECTION \"header\", ROM0[$100]\nDS 16\nSECTION \"entry\", ROM0[$108]\nnop\n";
    let err = link(text, LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Address { .. }), "{err}");
    assert!(err.message().contains("\"header\""), "{err}");
    assert!(err.message().contains("\"entry\""), "{err}");
}

#[test]
fn macro_type_errors_name_both_types() {
    let text = "SECTION \"main\", ROM0\nDB STRUPR(42)\n";
    let err = link(text, LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Expression { .. }), "{err}");
    assert!(err.message().contains("Text"), "{err}");
    assert!(err.message().contains("Number"), "{err}");
}

#[test]
fn unresolved_names() {
    let err = link("SECTION \"main\", ROM0\njp Nowhere\n", LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Reference { .. }), "{err}");
}

#[test]
fn jr_out_of_range() {
    let text = "SECTION \"main\", ROM0[$150]\nStart: nop\nDS 200\njr Start\n";
    let err = link(text, LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Address { .. }), "{err}");
}

#[test]
fn labels_resolve_across_files() {
    let loader = MemoryLoader::new()
        .with_file(
            "main.s",
            "INCLUDE \"lib.s\"\nSECTION \"main\", ROM0[$150]\ncall Helper\nld a, LIMIT\n",
        )
        .with_file(
            "lib.s",
            "LIMIT EQU _SCALE * 2\n_SCALE EQU 8\nSECTION \"lib\", ROM0[$200]\nHelper: ret\n",
        );
    let (files, _) = link_files(&loader, "main.s", LinkOptions::default()).unwrap();
    assert_eq!(section_bytes(&files[0], 0), [0xCD, 0x00, 0x02, 0x3E, 16]);
}

#[test]
fn private_names_stay_in_their_file() {
    let loader = MemoryLoader::new()
        .with_file("main.s", "INCLUDE \"lib.s\"\nSECTION \"main\", ROM0\nld a, _SCALE\n")
        .with_file("lib.s", "_SCALE EQU 8\n");
    let err = link_files(&loader, "main.s", LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Reference { .. }), "{err}");
    assert!(err.message().contains("private"), "{err}");
}

#[test]
fn ram_variables_and_string_data() {
    let text = "SECTION \"vars\", WRAM0\nwCount: DB\nwBuffer: DS 16\nwPtr: DW\nSECTION \"main\", ROM0[$150]\nld hl, wPtr\nNAME EQUS \"gb\"\nDB STRUPR(NAME), STRLEN(NAME)\n";
    let (files, _) = link(text, LinkOptions::default()).unwrap();
    let file = &files[0];
    let offsets: Vec<_> = file.variables.iter().map(|v| (v.offset, v.size)).collect();
    assert_eq!(offsets, [(0xC000, 1), (0xC001, 16), (0xC011, 2)]);
    assert_eq!(section_bytes(file, 1), [0x21, 0x11, 0xC0, b'G', b'B', 2]);
}

#[test]
fn rom_image() {
    let text = "SECTION \"boot\", ROM0[$100]\nnop\njp Main\nSECTION \"main\", ROM0[$150]\nMain: jr Main\nSECTION \"bank\", ROMX[$4000], BANK[1]\nDB \"far\"\n";
    let macros = MacroTable::builtin();
    let mut linker = Linker::new(&macros);
    linker
        .load(&MemoryLoader::new().with_file("main.s", text), "main.s")
        .unwrap();
    linker.link(&LinkOptions::default()).unwrap();
    let image = FlatRomWriter::default().write(linker.files()).unwrap();
    assert_eq!(image.bytes.len(), 0x8000);
    assert_eq!(image.bytes[0x100..0x104], [0x00, 0xC3, 0x50, 0x01]);
    assert_eq!(image.bytes[0x150..0x152], [0x18, 0xFE]);
    assert_eq!(&image.bytes[0x4000..0x4003], b"far");
    assert_eq!(
        linker.symbols(),
        "00:0150 Main\n"
    );
}

#[test]
fn operand_range_boundaries() {
    let code = |line: &str| {
        link(&format!("SECTION \"main\", ROM0\n{line}\n"), LinkOptions::default())
            .map(|(files, _)| section_bytes(&files[0], 0))
    };
    assert_eq!(code("ld a, -127").unwrap(), [0x3E, 0x81]);
    assert!(matches!(code("ld a, -128"), Err(Error::Argument { .. })));
    assert_eq!(code("ld hl, -32767").unwrap(), [0x21, 0x01, 0x80]);
    assert!(matches!(code("ld hl, -32768"), Err(Error::Argument { .. })));
    assert!(matches!(code("DB -128"), Err(Error::Argument { .. })));
    assert!(matches!(code("DW -32768"), Err(Error::Argument { .. })));
}

#[test]
fn reservations_past_the_address_space() {
    let err = link("SECTION \"a\", ROM0[$150]\nDS $FFFFFFFF\n", LinkOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Address { .. }), "{err}");
}
