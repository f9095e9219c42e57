//! End-to-end scenarios: statements through the assembler, objects through
//! their file form, programs through the link pipeline and the image codec.

use g10_asm::{Assembler, Condition, DataWidth, Expression, Operand, Register, Statement};
use g10_linker::{link_objects, LinkError, LinkInput, LinkOptions};
use g10_object::g10::{
    Address, Object, Program, ProgramInfo, SegmentFlag, SegmentType, Segment,
};

fn origin(base: i64) -> Statement {
    Statement::Origin(Expression::number(base))
}

fn label(name: &str) -> Statement {
    Statement::Label(name.to_owned())
}

fn global(name: &str) -> Statement {
    Statement::Global(name.to_owned())
}

fn nop() -> Statement {
    Statement::instruction("nop", vec![])
}

fn call(target: &str) -> Statement {
    Statement::instruction(
        "call",
        vec![
            Operand::Condition(Condition::None),
            Operand::Immediate(Expression::symbol(target)),
        ],
    )
}

fn jpb(target: &str) -> Statement {
    Statement::instruction(
        "jpb",
        vec![
            Operand::Condition(Condition::None),
            Operand::Immediate(Expression::symbol(target)),
        ],
    )
}

/// Assemble a unit and push the object through its file form, exactly as
/// the link driver would read it back.
fn assemble(name: &str, statements: &[Statement]) -> LinkInput {
    let object = Assembler::with_source_name(name).assemble(statements).unwrap();

    let mut bytes = Vec::new();
    object.write(&mut bytes).unwrap();

    let (rest, reread) = Object::read::<()>(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(reread, object, "`{name}` must round-trip through its file form");
    reread.validate().unwrap();

    LinkInput { name: name.to_owned(), object: reread.into_owned() }
}

fn link(inputs: &[LinkInput]) -> Program<'static> {
    let program = link_objects(inputs, &LinkOptions::default()).unwrap();

    assert_disjoint(&program.segments);

    program
}

/// For any pair of segments, `a.end <= b.base || b.end <= a.base`.
fn assert_disjoint(segments: &[Segment<'_>]) {
    for (index, a) in segments.iter().enumerate() {
        for b in &segments[index + 1..] {
            assert!(
                a.end() <= u64::from(b.load_address.0) || b.end() <= u64::from(a.load_address.0),
                "segments at {} and {} overlap",
                a.load_address,
                b.load_address,
            );
        }
    }
}

fn segment_at<'p>(program: &'p Program<'_>, base: u32) -> &'p Segment<'p> {
    program
        .segments
        .iter()
        .find(|segment| segment.load_address == Address(base))
        .unwrap_or_else(|| panic!("no segment at 0x{base:08x}"))
}

#[test]
fn test_nop_run() {
    let mut statements = vec![origin(0x2000), global("_start"), label("_start")];
    statements.extend((0..8).map(|_| nop()));

    let program = link(&[assemble("nops.g10o", &statements)]);

    // Save, then load: the round-trip law for program images.
    let mut bytes = Vec::new();
    program.write(&mut bytes).unwrap();

    let (rest, reread) = Program::read::<()>(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(reread, program);
    reread.validate().unwrap();

    assert_eq!(reread.segments.len(), 1);

    let segment = &reread.segments[0];
    assert_eq!(segment.r#type, SegmentType::Code);
    assert_eq!(segment.load_address, Address(0x2000));
    assert_eq!(segment.memory_size, 16);
    assert_eq!(segment.file_size(), 16);
    assert!(segment.data.iter().all(|byte| *byte == 0));

    assert_eq!(reread.entry_point, Some(Address(0x2000)));
    assert_eq!(reread.initial_stack_pointer, Some(Address::DEFAULT_STACK_POINTER));
}

#[test]
fn test_cross_object_call() {
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("function_b".to_owned()),
            origin(0x2000),
            global("function_a"),
            Statement::Entry("function_a".to_owned()),
            label("function_a"),
            call("function_b"),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[origin(0x2200), global("function_b"), label("function_b"), nop()],
    );

    let program = link(&[module_a, module_b]);

    // The call site in A carries B's absolute address, little-endian.
    let code_a = segment_at(&program, 0x2000);
    assert_eq!(&code_a.data[..], [0x00, 0x43, 0x00, 0x22, 0x00, 0x00]);

    assert_eq!(program.entry_point, Some(Address(0x2000)));
}

#[test]
fn test_abs32_patch_is_value_plus_addend() {
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("buffer".to_owned()),
            origin(0x2000),
            global("_start"),
            label("_start"),
            Statement::instruction(
                "ld",
                vec![
                    Operand::Register(Register::double(0)),
                    Operand::Immediate(Expression::binary(
                        g10_asm::BinaryOperator::Add,
                        Expression::symbol("buffer"),
                        Expression::number(0x12345),
                    )),
                ],
            ),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[
            origin(0x3000),
            global("buffer"),
            label("buffer"),
            Statement::Data { width: DataWidth::Dword, values: vec![Expression::number(0)] },
        ],
    );

    let program = link(&[module_a, module_b]);

    // The 4 bytes at the patch site decode to the resolved symbol value
    // plus the addend: 0x3000 + 0x12345.
    let code_a = segment_at(&program, 0x2000);
    assert_eq!(u32::from_le_bytes(code_a.data[2..6].try_into().unwrap()), 0x15345);
}

#[test]
fn test_cross_object_branch_is_pc_relative() {
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("target_b".to_owned()),
            origin(0x2000),
            Statement::Entry("start".to_owned()),
            label("start"),
            jpb("target_b"),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[origin(0x2100), global("target_b"), label("target_b"), nop()],
    );

    let program = link(&[module_a, module_b]);

    // Decoding the 2 bytes as signed and adding (site + 2) yields the
    // resolved target address.
    let code_a = segment_at(&program, 0x2000);
    let displacement = i16::from_le_bytes(code_a.data[2..4].try_into().unwrap());
    let site = 0x2000 + 2;

    assert_eq!(site + 2 + i64::from(displacement), 0x2100);
}

#[test]
fn test_cross_object_branch_out_of_range_is_rejected() {
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("target_b".to_owned()),
            origin(0x2000),
            Statement::Entry("start".to_owned()),
            label("start"),
            jpb("target_b"),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[origin(0x1_2000), global("target_b"), label("target_b"), nop()],
    );

    assert!(matches!(
        link_objects(&[module_a, module_b], &LinkOptions::default()),
        Err(LinkError::RelocationRange(kind, ..)) if kind == "rel16",
    ));
}

#[test]
fn test_quick_window_patch() {
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("quick_var".to_owned()),
            origin(0x2000),
            Statement::Entry("start".to_owned()),
            label("start"),
            Statement::instruction(
                "ldq",
                vec![
                    Operand::Register(Register::double(0)),
                    Operand::Direct(Expression::symbol("quick_var")),
                ],
            ),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[
            origin(0xffff_0000),
            Statement::Data { width: DataWidth::Byte, values: vec![Expression::number(8)] },
            global("quick_var"),
            label("quick_var"),
            Statement::Data { width: DataWidth::Dword, values: vec![Expression::number(1)] },
        ],
    );

    let program = link(&[module_a, module_b]);

    // `quick_var` sits 8 bytes into the quick RAM window.
    let code_a = segment_at(&program, 0x2000);
    assert_eq!(&code_a.data[2..4], [0x08, 0x00]);

    // The reservation became a zero-fill segment: size, but no data.
    let bss = segment_at(&program, 0xffff_0000);
    assert_eq!(bss.r#type, SegmentType::Bss);
    assert_eq!(bss.memory_size, 12);
    assert_eq!(bss.file_size(), 0);
}

#[test]
fn test_duplicate_global_is_rejected() {
    let module_a =
        assemble("a.g10o", &[origin(0x2000), global("main"), label("main"), nop()]);
    let module_b =
        assemble("b.g10o", &[origin(0x2100), global("main"), label("main"), nop()]);

    match link_objects(&[module_a, module_b], &LinkOptions::default()) {
        Err(LinkError::DuplicateGlobal(name, first, second)) => {
            assert_eq!(name, "main");
            assert_eq!(first, "a.g10o");
            assert_eq!(second, "b.g10o");
        }
        other => panic!("expected a duplicate-global error, got {other:?}"),
    }
}

#[test]
fn test_weak_definition_is_superseded() {
    let module_a = assemble(
        "a.g10o",
        &[origin(0x2000), Statement::Weak("main".to_owned()), label("main"), nop()],
    );
    let module_b =
        assemble("b.g10o", &[origin(0x2300), global("main"), label("main"), nop()]);
    let module_c = assemble(
        "c.g10o",
        &[
            Statement::Extern("main".to_owned()),
            origin(0x2400),
            label("restart"),
            call("main"),
        ],
    );

    let program = link(&[module_a, module_b, module_c]);

    // The strong definition wins, for the entry point and for the patch.
    assert_eq!(program.entry_point, Some(Address(0x2300)));

    let code_c = segment_at(&program, 0x2400);
    assert_eq!(u32::from_le_bytes(code_c.data[2..6].try_into().unwrap()), 0x2300);
}

#[test]
fn test_entry_point_fallback() {
    // No entry flag, no `main`: `_start` is selected.
    let program = link(&[assemble(
        "start.g10o",
        &[origin(0x2000), global("_start"), label("_start"), nop()],
    )]);

    assert_eq!(program.entry_point, Some(Address(0x2000)));

    // `main` outranks `_start`.
    let program = link(&[assemble(
        "both.g10o",
        &[
            origin(0x2000),
            global("_start"),
            label("_start"),
            nop(),
            global("main"),
            label("main"),
            nop(),
        ],
    )]);

    assert_eq!(program.entry_point, Some(Address(0x2002)));

    // The entry flag outranks both.
    let program = link(&[assemble(
        "flagged.g10o",
        &[
            origin(0x2000),
            global("main"),
            label("main"),
            nop(),
            Statement::Entry("boot".to_owned()),
            label("boot"),
            nop(),
        ],
    )]);

    assert_eq!(program.entry_point, Some(Address(0x2002)));
}

#[test]
fn test_missing_entry_point_is_rejected() {
    let input = assemble("anon.g10o", &[origin(0x2000), label("loop"), nop()]);

    assert!(matches!(
        link_objects(&[input], &LinkOptions::default()),
        Err(LinkError::MissingEntry),
    ));
}

#[test]
fn test_entry_in_data_is_rejected() {
    let input = assemble(
        "data.g10o",
        &[
            origin(0x3000),
            global("main"),
            label("main"),
            Statement::Data { width: DataWidth::Dword, values: vec![Expression::number(0)] },
        ],
    );

    assert!(matches!(
        link_objects(&[input], &LinkOptions::default()),
        Err(LinkError::EntryOutsideCode(Address(0x3000))),
    ));
}

#[test]
fn test_unresolved_extern_is_rejected() {
    let input = assemble(
        "a.g10o",
        &[
            Statement::Extern("function_b".to_owned()),
            origin(0x2000),
            global("_start"),
            label("_start"),
            call("function_b"),
        ],
    );

    assert!(matches!(
        link_objects(&[input], &LinkOptions::default()),
        Err(LinkError::UnresolvedExtern(name, object)) if name == "function_b" && object == "a.g10o",
    ));
}

#[test]
fn test_contiguous_code_sections_merge_into_one_segment() {
    let module_a = {
        let mut statements = vec![origin(0x2000), global("_start"), label("_start")];
        statements.extend((0..8).map(|_| nop()));

        assemble("a.g10o", &statements)
    };

    let module_b = {
        let mut statements = vec![origin(0x2010)];
        statements.push(label("helper"));
        statements.extend((0..4).map(|_| nop()));

        assemble("b.g10o", &statements)
    };

    let program = link(&[module_a, module_b]);

    assert_eq!(program.segments.len(), 1);
    assert_eq!(program.segments[0].load_address, Address(0x2000));
    assert_eq!(program.segments[0].memory_size, 24);
    assert!(program.segments[0].flags.contains(SegmentFlag::Executable));
}

#[test]
fn test_cross_object_segment_overlap_is_rejected() {
    let module_a = {
        let mut statements = vec![origin(0x2000), global("_start"), label("_start")];
        statements.extend((0..8).map(|_| nop()));

        assemble("a.g10o", &statements)
    };

    let module_b = {
        let mut statements = vec![origin(0x2008), label("helper")];
        statements.extend((0..8).map(|_| nop()));

        assemble("b.g10o", &statements)
    };

    assert!(matches!(
        link_objects(&[module_a, module_b], &LinkOptions::default()),
        Err(LinkError::SegmentOverlap(..)),
    ));
}

#[test]
fn test_program_info_is_embedded_with_a_checksum() {
    let input = assemble(
        "demo.g10o",
        &[origin(0x2000), global("_start"), label("_start"), nop()],
    );

    let options = LinkOptions {
        info: Some(ProgramInfo {
            name: "demo".into(),
            version: "0.1.0".into(),
            author: "".into(),
            description: "two engines, one image".into(),
            build_date: 1_722_470_400,
            checksum: 0,
        }),
        ..LinkOptions::default()
    };

    let program = link_objects(&[input], &options).unwrap();
    let info = program.info.as_ref().unwrap();

    assert_ne!(info.checksum, 0);
    assert_eq!(info.build_date, 1_722_470_400);

    // The info record survives the image codec.
    let mut bytes = Vec::new();
    program.write(&mut bytes).unwrap();
    let (_, reread) = Program::read::<()>(&bytes).unwrap();

    assert_eq!(reread.info, program.info);
}

#[test]
fn test_mutually_recursive_modules() {
    // Two modules calling each other: resolution is symmetric, one pass.
    let module_a = assemble(
        "a.g10o",
        &[
            Statement::Extern("pong".to_owned()),
            origin(0x2000),
            global("ping"),
            Statement::Entry("ping".to_owned()),
            label("ping"),
            call("pong"),
        ],
    );

    let module_b = assemble(
        "b.g10o",
        &[
            Statement::Extern("ping".to_owned()),
            origin(0x2100),
            global("pong"),
            label("pong"),
            call("ping"),
        ],
    );

    let program = link(&[module_a, module_b]);

    let code_a = segment_at(&program, 0x2000);
    let code_b = segment_at(&program, 0x2100);

    assert_eq!(u32::from_le_bytes(code_a.data[2..6].try_into().unwrap()), 0x2100);
    assert_eq!(u32::from_le_bytes(code_b.data[2..6].try_into().unwrap()), 0x2000);
}

#[test]
fn test_interrupt_window_sections_become_interrupt_segments() {
    // A reset vector in the interrupt window, jumping into ROM code.
    let vectors = assemble(
        "vectors.g10o",
        &[
            Statement::Extern("reset".to_owned()),
            origin(0x1000),
            Statement::Entry("vector_0".to_owned()),
            label("vector_0"),
            Statement::instruction(
                "jmp",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("reset")),
                ],
            ),
        ],
    );

    let rom = assemble(
        "reset.g10o",
        &[origin(0x2000), global("reset"), label("reset"), nop()],
    );

    let program = link(&[vectors, rom]);

    let vector_segment = segment_at(&program, 0x1000);
    assert_eq!(vector_segment.r#type, SegmentType::Interrupt);
    assert!(vector_segment.flags.contains(SegmentFlag::Executable));

    // The vector's jump target is patched to the ROM address.
    assert_eq!(u32::from_le_bytes(vector_segment.data[2..6].try_into().unwrap()), 0x2000);

    // The entry point may live in the interrupt window.
    assert_eq!(program.entry_point, Some(Address(0x1000)));
}
