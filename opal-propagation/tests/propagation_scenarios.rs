//! End-to-end analysis scenarios over hand-assembled images.

use opal_program::{ImageBuilder, Literal, MethodAsm, Opcode};
use opal_propagation::primitives::{CORE_INT_ADD, MODULE_CORE};
use opal_propagation::{PropagatorConfig, TypeDatabase};

const SEL_ADD: u16 = 50;
const SEL_SPEAK: u16 = 60;

#[test]
fn test_monomorphic_increment() {
    let mut builder = ImageBuilder::new();
    let special = builder.special_classes();

    // smi.add(other) is foreign; overflow widens to a large integer and
    // the failure path throws the error value.
    let mut add_asm = MethodAsm::new(2, 8).with_selector(SEL_ADD);
    add_asm.primitive(MODULE_CORE, CORE_INT_ADD).op(Opcode::Throw);
    let add_method = builder.add_method(add_asm);
    builder.set_dispatch(special.smi_class as usize + SEL_ADD as usize, add_method);
    builder.set_invoke_offset(Opcode::InvokeAdd, SEL_ADD);

    // inc(x): return x + 1
    let mut inc_asm = MethodAsm::new(1, 8);
    inc_asm
        .op(Opcode::LoadLocal2)
        .op(Opcode::LoadSmi1)
        .op(Opcode::InvokeAdd)
        .op(Opcode::Return);
    let inc_method = builder.add_method(inc_asm);
    builder.set_dispatch(200, inc_method);

    // main(task): return inc(0)
    let mut main_asm = MethodAsm::new(1, 8);
    main_asm
        .op(Opcode::LoadSmi0)
        .op_u16(Opcode::InvokeStatic, 200)
        .op(Opcode::Return);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    // inc is only ever called with a smi.
    let arguments = database.arguments(inc_method).expect("inc was analyzed");
    assert_eq!(arguments.len(), 1);
    assert_eq!(
        arguments[0].iter().collect::<Vec<u32>>(),
        vec![special.smi_class]
    );

    // The static call site sees the addition's result.
    let call_site = program.method_at(main_method).entry() + 1;
    let usage = database.usage(call_site).expect("call site recorded");
    assert!(usage.contains(special.smi_class));
    assert!(usage.contains(special.large_integer_class));
    assert!(!usage.contains(special.null_class));

    // So does the virtual call site inside inc.
    let add_site = program.method_at(inc_method).entry() + 2;
    let usage = database.usage(add_site).expect("add site recorded");
    assert!(usage.contains(special.smi_class));
    assert!(usage.contains(special.large_integer_class));
}

#[test]
fn test_polymorphic_call_specializes_per_receiver() {
    let mut builder = ImageBuilder::new();
    let class_a = builder.add_class(0);
    let class_b = builder.add_class(0);

    // One method installed for both receivers: return self.
    let mut speak_asm = MethodAsm::new(1, 8).with_selector(SEL_SPEAK);
    speak_asm.op(Opcode::LoadLocal2).op(Opcode::Return);
    let speak_method = builder.add_method(speak_asm);
    builder.set_dispatch(class_a as usize + SEL_SPEAK as usize, speak_method);
    builder.set_dispatch(class_b as usize + SEL_SPEAK as usize, speak_method);

    // main(task): A().speak(); return B().speak()
    let mut main_asm = MethodAsm::new(1, 8);
    main_asm.op_u8(Opcode::Allocate, class_a as u8);
    main_asm.invoke_virtual(0, SEL_SPEAK);
    main_asm.op(Opcode::Pop1);
    main_asm.op_u8(Opcode::Allocate, class_b as u8);
    main_asm.invoke_virtual(0, SEL_SPEAK);
    main_asm.op(Opcode::Return);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    // The callee's receiver column is the union over specializations.
    let arguments = database.arguments(speak_method).expect("speak analyzed");
    assert_eq!(
        arguments[0].iter().collect::<Vec<u32>>(),
        vec![class_a, class_b]
    );

    // Each call site only sees its own receiver's specialization.
    let entry = program.method_at(main_method).entry();
    let first_site = database.usage(entry + 2).expect("first call recorded");
    assert_eq!(first_site.iter().collect::<Vec<u32>>(), vec![class_a]);
    let second_site = database.usage(entry + 9).expect("second call recorded");
    assert_eq!(second_site.iter().collect::<Vec<u32>>(), vec![class_b]);
}

fn megamorphic_image() -> (opal_program::Program, u32, Vec<u32>) {
    let mut builder = ImageBuilder::new();
    let classes: Vec<u32> = (0..7).map(|_| builder.add_class(0)).collect();
    builder.add_global(Literal::Null);

    // id(x): return x
    let mut id_asm = MethodAsm::new(1, 8);
    id_asm.op(Opcode::LoadLocal2).op(Opcode::Return);
    let id_method = builder.add_method(id_asm);
    builder.set_dispatch(200, id_method);

    // main(task): g = one of seven classes; return id(g)
    let mut main_asm = MethodAsm::new(1, 8);
    for &class in &classes {
        main_asm.op_u8(Opcode::Allocate, class as u8);
        main_asm.op_u8(Opcode::StoreGlobalVar, 0);
        main_asm.op(Opcode::Pop1);
    }
    main_asm.op_u8(Opcode::LoadGlobalVar, 0);
    main_asm.op_u16(Opcode::InvokeStatic, 200);
    main_asm.op(Opcode::Return);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    (program, id_method, classes)
}

#[test]
fn test_megamorphic_argument_widens_to_any() {
    let (program, id_method, _classes) = megamorphic_image();
    // Seven classes plus the global's initial null exceed the default
    // threshold of five: one specialization keyed ANY, not eight.
    let database = TypeDatabase::compute(&program);
    let arguments = database.arguments(id_method).expect("id analyzed");
    assert!(arguments[0].is_any(&program));
}

#[test]
fn test_raised_threshold_keeps_precision() {
    let (program, id_method, classes) = megamorphic_image();
    let config = PropagatorConfig {
        megamorphic_threshold: 10,
    };
    let database = TypeDatabase::compute_with_config(&program, config);
    let arguments = database.arguments(id_method).expect("id analyzed");
    assert!(!arguments[0].is_any(&program));
    assert!(arguments[0].contains(program.null_class()));
    for class in classes {
        assert!(arguments[0].contains(class));
    }
}

#[test]
fn test_block_escape_and_mutation() {
    let mut builder = ImageBuilder::new();
    let special = builder.special_classes();
    let global = builder.add_global(Literal::Null);
    let float_literal = builder.add_literal(Literal::Float(1.5));

    // [|v| x := v]: store the parameter into the captured local.
    let mut block_asm = MethodAsm::new(2, 8);
    block_asm
        .op(Opcode::LoadLocal3) // receiver block
        .op(Opcode::LoadLocal3) // parameter
        .op_u8(Opcode::StoreOuter, 1)
        .op(Opcode::Return);
    let block_method = builder.add_method(block_asm);

    // helper(b): b.call(0); b.call(1.5)
    let mut helper_asm = MethodAsm::new(1, 8);
    helper_asm
        .op(Opcode::LoadLocal2)
        .op(Opcode::LoadSmi0)
        .op_u8(Opcode::InvokeBlock, 2)
        .op(Opcode::Pop1)
        .op(Opcode::LoadLocal2)
        .op_u8(Opcode::LoadLiteral, float_literal as u8)
        .op_u8(Opcode::InvokeBlock, 2)
        .op(Opcode::Pop1)
        .op(Opcode::ReturnNull);
    let helper_method = builder.add_method(helper_asm);
    builder.set_dispatch(210, helper_method);

    // main(task): x := null; helper([|v| x := v]); g = x
    let mut main_asm = MethodAsm::new(1, 8);
    main_asm
        .op(Opcode::LoadNull)
        .op_u32(Opcode::LoadBlockMethod, block_method)
        .op_u16(Opcode::InvokeStatic, 210)
        .op(Opcode::Pop1)
        .op_u8(Opcode::StoreGlobalVar, global as u8)
        .op_u8(Opcode::LoadGlobalVar, global as u8)
        .op(Opcode::Pop1)
        .op(Opcode::Return);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    // The block's parameter saw both invocation types.
    let block_arguments = database
        .block_arguments(block_method)
        .expect("block analyzed");
    assert_eq!(block_arguments.len(), 1);
    assert!(block_arguments[0].contains(special.smi_class));
    assert!(block_arguments[0].contains(special.float_class));
    assert!(!block_arguments[0].contains(special.null_class));

    // The helper's parameter is a block: rendered as an empty column,
    // and specialized by block identity rather than captured types.
    let helper_arguments = database
        .arguments(helper_method)
        .expect("helper analyzed");
    assert!(helper_arguments[0].is_empty());

    // The captured local accumulated every stored type plus its
    // initial null. LOAD_NULL(1) + LOAD_BLOCK_METHOD(5) +
    // INVOKE_STATIC(3) + POP(1) + STORE_GLOBAL_VAR(2) put the reload
    // at entry + 12.
    let entry = program.method_at(main_method).entry();
    let reload_site = entry + 12;
    let usage = database.usage(reload_site).expect("reload recorded");
    assert!(usage.contains(special.null_class));
    assert!(usage.contains(special.smi_class));
    assert!(usage.contains(special.float_class));
}

fn try_unwind_image(body_throws: bool) -> (opal_program::Program, u32) {
    let mut builder = ImageBuilder::new();
    builder.add_global(Literal::Null);

    let mut block_asm = MethodAsm::new(1, 8);
    if body_throws {
        block_asm.op(Opcode::Throw);
    } else {
        block_asm.op(Opcode::ReturnNull);
    }
    let block_method = builder.add_method(block_asm);

    // main(task): try { body } then read a global behind the unwind.
    let mut main_asm = MethodAsm::new(1, 12);
    main_asm
        .op(Opcode::Link)
        .op_u32(Opcode::LoadBlockMethod, block_method)
        .op_u8(Opcode::InvokeBlock, 1)
        .op(Opcode::Pop1)
        .op(Opcode::Unlink)
        .op(Opcode::Unwind)
        .op_u8(Opcode::LoadGlobalVar, 0)
        .op(Opcode::Pop1)
        .op(Opcode::ReturnNull);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    (program, main_method)
}

#[test]
fn test_guaranteed_unwind_kills_code_after_try() {
    let (program, main_method) = try_unwind_image(true);
    let database = TypeDatabase::compute(&program);
    // LINK(1) + LOAD_BLOCK_METHOD(5) + INVOKE_BLOCK(2) + POP(1) +
    // UNLINK(1) + UNWIND(1) put the dead global load at entry + 11.
    let entry = program.method_at(main_method).entry();
    assert!(
        database.usage(entry + 11).is_none(),
        "code behind a guaranteed unwind must not be analyzed"
    );
}

#[test]
fn test_completed_try_continues_after_unwind() {
    let (program, main_method) = try_unwind_image(false);
    let database = TypeDatabase::compute(&program);
    let entry = program.method_at(main_method).entry();
    let usage = database.usage(entry + 11).expect("global load reachable");
    assert!(usage.contains(program.null_class()));
}

#[test]
fn test_lazy_global_reports_initializer_result() {
    let mut builder = ImageBuilder::new();
    let special = builder.special_classes();
    let float_literal = builder.add_literal(Literal::Float(2.5));

    let mut init_asm = MethodAsm::new(0, 8);
    init_asm
        .op_u8(Opcode::LoadLiteral, float_literal as u8)
        .op(Opcode::Return);
    let init_method = builder.add_method(init_asm);
    let global = builder.add_lazy_global(init_method);

    let mut main_asm = MethodAsm::new(1, 8);
    main_asm
        .op_u8(Opcode::LoadGlobalVarLazy, global as u8)
        .op(Opcode::Pop1)
        .op(Opcode::ReturnNull);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    // The first lazy load produces the initializer's return type, never
    // the unset null.
    let site = program.method_at(main_method).entry();
    let usage = database.usage(site).expect("lazy load recorded");
    assert!(usage.contains(special.float_class));
    assert!(!usage.contains(special.null_class));
}

#[test]
fn test_fixpoint_terminates_on_loops() {
    let mut builder = ImageBuilder::new();
    builder.add_global(Literal::Null);

    // main(task): x := null; loop { g = x; x := 0 }
    let mut main_asm = MethodAsm::new(1, 8);
    main_asm.op(Opcode::LoadNull);
    let target = main_asm.here();
    main_asm
        .op(Opcode::LoadLocal0)
        .op_u8(Opcode::StoreGlobalVar, 0)
        .op(Opcode::Pop1)
        .op(Opcode::LoadSmi0)
        .op_u8(Opcode::StoreLocal, 1)
        .op(Opcode::Pop1)
        .branch_back(Opcode::BranchBack, target)
        .op(Opcode::ReturnNull); // unreachable
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    let arguments = database.arguments(main_method).expect("main analyzed");
    assert_eq!(
        arguments[0].iter().collect::<Vec<u32>>(),
        vec![program.task_class()]
    );
}

#[test]
fn test_same_tuple_shares_a_specialization() {
    let mut builder = ImageBuilder::new();
    let special = builder.special_classes();

    let mut id_asm = MethodAsm::new(1, 8);
    id_asm.op(Opcode::LoadLocal2).op(Opcode::Return);
    let id_method = builder.add_method(id_asm);
    builder.set_dispatch(200, id_method);

    let mut main_asm = MethodAsm::new(1, 8);
    main_asm
        .op(Opcode::LoadSmi0)
        .op_u16(Opcode::InvokeStatic, 200)
        .op(Opcode::Pop1)
        .op(Opcode::LoadSmi1)
        .op_u16(Opcode::InvokeStatic, 200)
        .op(Opcode::Return);
    let main_method = builder.add_method(main_asm);
    builder.entry(main_method);

    let program = builder.finish().expect("image should validate");
    let database = TypeDatabase::compute(&program);

    // Both sites resolve to the same smi-keyed specialization.
    let entry = program.method_at(main_method).entry();
    let first = database.usage(entry + 1).expect("first call recorded");
    let second = database.usage(entry + 6).expect("second call recorded");
    assert_eq!(
        first.iter().collect::<Vec<u32>>(),
        second.iter().collect::<Vec<u32>>()
    );
    let arguments = database.arguments(id_method).expect("id analyzed");
    assert_eq!(
        arguments[0].iter().collect::<Vec<u32>>(),
        vec![special.smi_class]
    );
}
