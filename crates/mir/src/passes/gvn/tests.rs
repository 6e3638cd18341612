use super::*;
use crate::{
    builder::MirBuilder,
    ir::{FieldInfo, FieldInfoId, Opcode},
};
use pretty_assertions::assert_eq;

fn v(n: u32) -> SsaReg {
    SsaReg::from_u32(n)
}

/// Runs discovery and returns the value names of `regs`.
fn values_of<const N: usize>(graph: &MirGraph, regs: [u32; N]) -> [ValueName; N] {
    let arena = Bump::new();
    let mut gvn = DiscoveringGvn::new(graph, &arena);
    gvn.run(graph);
    assert!(gvn.good());
    regs.map(|r| {
        gvn.value_of(graph, v(r))
            .unwrap_or_else(|| panic!("v{r} was not numbered"))
    })
}

fn rewrite(graph: &mut MirGraph) -> CheckStats {
    let arena = Bump::new();
    run_gvn(graph, &arena).expect("numbering overflowed")
}

fn flags(graph: &MirGraph, mir: MirId) -> OptFlags {
    graph.mirs[mir].optimization_flags
}

struct Fields {
    f: FieldInfoId,
    g: FieldInfoId,
}

fn fields(b: &mut MirBuilder) -> Fields {
    Fields {
        f: b.ifield(FieldInfo::resolved(DexFileId::new(0), 1)),
        g: b.ifield(FieldInfo::resolved(DexFileId::new(0), 2)),
    }
}

#[test]
fn equal_constants_share_a_name() {
    let mut b = MirBuilder::new("constants");
    b.instr().constant(Opcode::Const4, v(0), 5);
    b.instr().constant(Opcode::Const4, v(1), 5);
    b.instr().binop_lit(Opcode::AddIntLit8, v(2), v(0), 0);
    b.instr().constant(Opcode::Const16, v(3), 6);
    b.instr().constant(Opcode::Const, v(4), 5);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [c0, c1, add, six, c4] = values_of(&graph, [0, 1, 2, 3, 4]);
    assert_eq!(c0, c1);
    assert_eq!(c0, c4);
    assert_ne!(add, six);
    assert_ne!(add, c0);
}

#[test]
fn wide_constant_forms_agree() {
    let mut b = MirBuilder::new("wide");
    b.instr().constant(Opcode::ConstWide16, v(0), -1);
    b.instr().const_wide(v(1), -1);
    b.instr().constant(Opcode::ConstWide32, v(2), 1);
    b.instr().const_wide(v(3), 1);
    b.instr().constant(Opcode::ConstWideHigh16, v(4), 0x4000);
    b.instr().const_wide(v(5), 0x4000_0000_0000_0000);
    b.instr().const_wide(v(6), 0x0000_0001_0000_0001);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [m16, m64, one32, one64, high16, high64, mixed] =
        values_of(&graph, [0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(m16, m64);
    assert_eq!(one32, one64);
    assert_eq!(high16, high64);
    assert_ne!(mixed, one64);
    assert_ne!(m64, one64);
}

#[test]
fn congruent_arithmetic_is_numbered_equal() {
    let mut b = MirBuilder::new("arith");
    b.instr().binop(Opcode::AddInt, v(2), v(0), v(1));
    b.instr().binop(Opcode::AddInt, v(3), v(0), v(1));
    b.instr().binop(Opcode::SubInt, v(4), v(0), v(1));
    b.instr().move_(Opcode::Move, v(5), v(1));
    b.instr().binop(Opcode::AddInt, v(6), v(0), v(5));
    b.instr().binop(Opcode::AddInt, v(7), v(1), v(0));
    b.instr().unop(Opcode::NegInt, v(8), v(2));
    b.instr().unop(Opcode::NegInt, v(9), v(6));
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [add, add2, sub, moved_add, swapped, neg, neg2] =
        values_of(&graph, [2, 3, 4, 6, 7, 8, 9]);
    assert_eq!(add, add2);
    assert_eq!(add, moved_add);
    assert_ne!(add, sub);
    // Operand order is part of the key.
    assert_ne!(add, swapped);
    assert_eq!(neg, neg2);
}

#[test]
fn store_through_unknown_alias_invalidates_load() {
    let mut b = MirBuilder::new("alias");
    let Fields { f, g } = fields(&mut b);
    b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().iget(Opcode::Iget, v(3), v(0), g);
    b.instr().iput(Opcode::Iput, v(9), v(1), f);
    b.instr().iget(Opcode::Iget, v(4), v(0), f);
    b.instr().iget(Opcode::Iget, v(5), v(0), g);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [f_before, g_before, f_after, g_after] = values_of(&graph, [2, 3, 4, 5]);
    assert_ne!(f_before, f_after);
    assert_eq!(g_before, g_after);
}

#[test]
fn stored_value_is_forwarded_to_load() {
    let mut b = MirBuilder::new("forward");
    let Fields { f, .. } = fields(&mut b);
    b.instr().iput(Opcode::Iput, v(1), v(0), f);
    b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [stored, loaded] = values_of(&graph, [1, 2]);
    assert_eq!(stored, loaded);
}

#[test]
fn redundant_stores_are_counted() {
    let mut b = MirBuilder::new("redundant");
    let Fields { f, .. } = fields(&mut b);
    b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().iput(Opcode::Iput, v(1), v(0), f);
    b.instr().iput(Opcode::Iput, v(1), v(0), f);
    b.instr().iput(Opcode::Iput, v(2), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let stats = rewrite(&mut graph);
    assert_eq!(stats.redundant_stores, 2);
}

#[test]
fn repeated_null_checks_are_flagged() {
    let mut b = MirBuilder::new("null");
    let Fields { f, g } = fields(&mut b);
    let first = b.instr().iget(Opcode::Iget, v(1), v(0), f);
    let second = b.instr().iget(Opcode::Iget, v(2), v(0), g);
    let third = b.instr().iput(Opcode::Iput, v(2), v(0), f);
    let other = b.instr().iget(Opcode::Iget, v(4), v(3), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let stats = rewrite(&mut graph);
    assert_eq!(flags(&graph, first), OptFlags::empty());
    assert_eq!(flags(&graph, second), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(flags(&graph, third), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(flags(&graph, other), OptFlags::empty());
    assert_eq!(
        stats,
        CheckStats {
            null_checks: 4,
            null_checks_eliminated: 2,
            ..CheckStats::default()
        }
    );
}

#[test]
fn unique_object_ignores_calls_until_it_escapes() {
    let build = |escape: bool| {
        let mut b = MirBuilder::new("unique");
        let Fields { f, .. } = fields(&mut b);
        b.instr().new_instance(v(0));
        let load = b.instr().iget(Opcode::Iget, v(3), v(0), f);
        if escape {
            b.instr().aput(Opcode::AputObject, v(0), v(1), v(2));
        }
        b.instr().invoke(Opcode::InvokeStatic, &[]);
        b.instr().iget(Opcode::Iget, v(4), v(0), f);
        b.instr().return_(Opcode::ReturnVoid, None);
        (b.finish(), load)
    };

    let (graph, _) = build(false);
    let [before, after] = values_of(&graph, [3, 4]);
    assert_eq!(before, after);

    let (mut graph, load) = build(true);
    let [before, after] = values_of(&graph, [3, 4]);
    assert_ne!(before, after);

    // Allocation results are known non-null.
    rewrite(&mut graph);
    assert_eq!(flags(&graph, load), OptFlags::IGNORE_NULL_CHECK);
}

#[test]
fn invoke_arguments_lose_uniqueness() {
    let mut b = MirBuilder::new("invoke-args");
    let Fields { f, .. } = fields(&mut b);
    b.instr().new_instance(v(0));
    b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().invoke(Opcode::InvokeStatic, &[v(0)]);
    b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [before, after] = values_of(&graph, [1, 2]);
    assert_ne!(before, after);
}

#[test]
fn invoke_checks_receiver_and_clobbers_memory() {
    let mut b = MirBuilder::new("invoke");
    let Fields { f, .. } = fields(&mut b);
    b.instr().iget(Opcode::Iget, v(2), v(1), f);
    let call = b.instr().invoke(Opcode::InvokeVirtual, &[v(0), v(1)]);
    let load = b.instr().iget(Opcode::Iget, v(3), v(0), f);
    b.instr().iget(Opcode::Iget, v(4), v(1), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let [before, after] = values_of(&graph, [2, 4]);
    assert_ne!(before, after);

    rewrite(&mut graph);
    assert_eq!(flags(&graph, call), OptFlags::empty());
    assert_eq!(flags(&graph, load), OptFlags::IGNORE_NULL_CHECK);
}

#[test]
fn filled_new_array_result_is_non_null() {
    let mut b = MirBuilder::new("filled");
    let Fields { f, .. } = fields(&mut b);
    b.instr().filled_new_array(&[v(0), v(1)]);
    b.instr().def_only(Opcode::MoveResultObject, v(2));
    let load = b.instr().iget(Opcode::IgetObject, v(3), v(2), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    rewrite(&mut graph);
    assert_eq!(flags(&graph, load), OptFlags::IGNORE_NULL_CHECK);
}

#[test]
fn array_checks_and_versions() {
    let mut b = MirBuilder::new("arrays");
    let first = b.instr().aget(Opcode::Aget, v(3), v(1), v(2));
    let second = b.instr().aget(Opcode::Aget, v(4), v(1), v(2));
    let other_index = b.instr().aget(Opcode::Aget, v(5), v(1), v(0));
    b.instr().aput(Opcode::Aput, v(9), v(1), v(0));
    b.instr().aget(Opcode::Aget, v(6), v(1), v(2));
    let length = b.instr().array_length(v(7), v(1));
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let [a, a_again, stale] = values_of(&graph, [3, 4, 6]);
    assert_eq!(a, a_again);
    assert_ne!(a, stale);

    let stats = rewrite(&mut graph);
    assert_eq!(flags(&graph, first), OptFlags::empty());
    assert_eq!(
        flags(&graph, second),
        OptFlags::IGNORE_NULL_CHECK | OptFlags::IGNORE_RANGE_CHECK
    );
    assert_eq!(flags(&graph, other_index), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(flags(&graph, length), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(stats.range_checks, 5);
    assert_eq!(stats.range_checks_eliminated, 3);
}

#[test]
fn unresolved_and_volatile_fields() {
    let mut b = MirBuilder::new("unresolved");
    let Fields { f, g } = fields(&mut b);
    let unresolved = b.ifield(FieldInfo::unresolved());
    let volatile = b.ifield(FieldInfo::resolved_volatile(DexFileId::new(1), 3));
    b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().iget(Opcode::IgetWide, v(3), v(0), g);
    b.instr().iput(Opcode::Iput, v(9), v(1), unresolved);
    b.instr().iget(Opcode::Iget, v(4), v(0), f);
    b.instr().iget(Opcode::IgetWide, v(5), v(0), g);
    b.instr().iget(Opcode::Iget, v(6), v(0), volatile);
    b.instr().iget(Opcode::Iget, v(7), v(0), volatile);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [f_before, g_before, f_after, g_after, vol1, vol2] =
        values_of(&graph, [2, 3, 4, 5, 6, 7]);
    // The unresolved store may alias any narrow field.
    assert_ne!(f_before, f_after);
    assert_eq!(g_before, g_after);
    assert_ne!(vol1, vol2);
}

#[test]
fn static_fields() {
    let mut b = MirBuilder::new("statics");
    let s = b.sfield(FieldInfo::resolved(DexFileId::new(0), 4));
    b.instr().sget(Opcode::Sget, v(1), s);
    b.instr().sget(Opcode::Sget, v(2), s);
    b.instr().sput(Opcode::Sput, v(3), s);
    b.instr().sget(Opcode::Sget, v(4), s);
    b.instr().invoke(Opcode::InvokeStatic, &[]);
    b.instr().sget(Opcode::Sget, v(5), s);
    b.instr().return_(Opcode::ReturnVoid, None);
    let graph = b.finish();

    let [first, second, stored, forwarded, after_call] = values_of(&graph, [1, 2, 3, 4, 5]);
    assert_eq!(first, second);
    assert_eq!(stored, forwarded);
    assert_ne!(after_call, stored);
    assert_ne!(after_call, first);
}

/// entry: `v1 = v0.f`, branch to left or right, both join.
fn diamond(store_in_left: bool) -> (MirGraph, [MirId; 2]) {
    let mut b = MirBuilder::new("diamond");
    let Fields { f, .. } = fields(&mut b);
    let left = b.create_named_block("left");
    let right = b.create_named_block("right");
    let join = b.create_named_block("join");

    b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().branch(Opcode::IfEqz, &[v(9)], left, right);

    b.switch_to_block(left);
    b.instr().aget(Opcode::Aget, v(3), v(2), v(4));
    if store_in_left {
        b.instr().iput(Opcode::Iput, v(7), v(0), f);
    }
    b.instr().goto(join);

    b.switch_to_block(right);
    b.instr().goto(join);

    b.switch_to_block(join);
    b.instr().phi(v(8), &[(left, v(1)), (right, v(1))]);
    b.instr().phi(v(10), &[(left, v(7)), (right, v(1))]);
    let load = b.instr().iget(Opcode::Iget, v(5), v(0), f);
    let element = b.instr().aget(Opcode::Aget, v(6), v(2), v(4));
    b.instr().return_(Opcode::ReturnVoid, None);
    (b.finish(), [load, element])
}

#[test]
fn merge_keeps_facts_common_to_all_predecessors() {
    let (mut graph, [load, element]) = diamond(false);

    let [before, after, same_phi, mixed_phi] = values_of(&graph, [1, 5, 8, 10]);
    assert_eq!(before, after);
    assert_eq!(same_phi, before);
    assert_ne!(mixed_phi, before);

    rewrite(&mut graph);
    assert_eq!(flags(&graph, load), OptFlags::IGNORE_NULL_CHECK);
    // Only checked on one side of the diamond.
    assert_eq!(flags(&graph, element), OptFlags::empty());
}

#[test]
fn merge_of_differing_memory_gets_a_new_version() {
    let (graph, _) = diamond(true);
    let [before, after] = values_of(&graph, [1, 5]);
    assert_ne!(before, after);
}

#[test]
fn loop_header_forgets_memory_but_keeps_null_checks() {
    let mut b = MirBuilder::new("loop");
    let Fields { f, .. } = fields(&mut b);
    let header = b.create_named_block("header");
    let body = b.create_named_block("body");
    let exit = b.create_named_block("exit");
    let entry = b.entry_block();

    let entry_load = b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().goto(header);

    b.switch_to_block(header);
    b.instr().phi(v(2), &[(entry, v(1)), (body, v(3))]);
    let header_load = b.instr().iget(Opcode::Iget, v(4), v(0), f);
    b.instr().branch(Opcode::IfEqz, &[v(4)], exit, body);

    b.switch_to_block(body);
    b.instr().binop(Opcode::AddInt, v(3), v(2), v(2));
    let store = b.instr().iput(Opcode::Iput, v(3), v(0), f);
    b.instr().goto(header);

    b.switch_to_block(exit);
    b.instr().return_(Opcode::Return, Some(v(2)));
    let mut graph = b.finish();

    let [outside, inside, phi] = values_of(&graph, [1, 4, 2]);
    assert_ne!(outside, inside);
    assert_ne!(phi, outside);

    let stats = rewrite(&mut graph);
    assert_eq!(flags(&graph, entry_load), OptFlags::empty());
    assert_eq!(flags(&graph, header_load), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(flags(&graph, store), OptFlags::IGNORE_NULL_CHECK);
    assert_eq!(stats.null_checks, 3);
    assert_eq!(stats.null_checks_eliminated, 2);
}

#[test]
fn second_discovery_pass_changes_nothing() {
    let (graph, _) = diamond(true);
    let arena = Bump::new();
    let mut gvn = DiscoveringGvn::new(&graph, &arena);
    let order = gvn.reverse_post_order().to_vec();
    assert_eq!(order.len(), 4);

    for &block in &order {
        assert!(gvn.process_basic_block(&graph, block));
    }
    for &block in &order {
        assert!(!gvn.process_basic_block(&graph, block));
    }
}

#[test]
fn rewrite_reports_changes_once() {
    let (mut graph, _) = diamond(false);
    let arena = Bump::new();
    let mut discovery = DiscoveringGvn::new(&graph, &arena);
    discovery.run(&graph);
    let mut gvn = discovery.finalize().expect("no overflow");
    assert!(gvn.can_modify());

    let order = gvn.reverse_post_order().to_vec();
    let changed: Vec<bool> = order
        .iter()
        .map(|&block| gvn.process_basic_block(&mut graph, block))
        .collect();
    // Only the join block carries a redundant check.
    assert_eq!(changed.iter().filter(|&&c| c).count(), 1);

    for &block in &order {
        assert!(!gvn.process_basic_block(&mut graph, block));
    }
}

#[test]
fn repeated_runs_find_the_same_checks() {
    let (mut graph, _) = diamond(true);
    let first = rewrite(&mut graph);
    let flags_after_first: Vec<OptFlags> =
        graph.mirs.values().map(|m| m.optimization_flags).collect();
    let second = rewrite(&mut graph);
    let flags_after_second: Vec<OptFlags> =
        graph.mirs.values().map(|m| m.optimization_flags).collect();
    assert_eq!(first, second);
    assert_eq!(flags_after_first, flags_after_second);
}

#[test]
fn irreducible_entry_starts_from_nothing() {
    let mut b = MirBuilder::new("irreducible");
    let Fields { f, .. } = fields(&mut b);
    let a = b.create_named_block("a");
    let c = b.create_named_block("c");

    b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().branch(Opcode::IfEqz, &[v(9)], a, c);

    b.switch_to_block(a);
    let in_a = b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().goto(c);

    b.switch_to_block(c);
    let in_c = b.instr().iget(Opcode::Iget, v(3), v(0), f);
    b.instr().goto(a);
    let mut graph = b.finish();

    rewrite(&mut graph);
    // `a` is entered both from the entry block and from `c`, which it
    // does not dominate.
    assert_eq!(flags(&graph, in_a), OptFlags::empty());
    assert_eq!(flags(&graph, in_c), OptFlags::IGNORE_NULL_CHECK);
}

#[test]
fn unreachable_blocks_are_left_alone() {
    let mut b = MirBuilder::new("dead");
    let Fields { f, .. } = fields(&mut b);
    let dead = b.create_block();
    b.instr().iget(Opcode::Iget, v(1), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    b.switch_to_block(dead);
    let load = b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    rewrite(&mut graph);
    assert_eq!(flags(&graph, load), OptFlags::empty());
}

#[test]
fn overflow_discards_the_numbering() {
    let mut b = MirBuilder::new("huge");
    let Fields { f, .. } = fields(&mut b);
    b.instr().iget(Opcode::Iget, v(0), v(1), f);
    let redundant = b.instr().iget(Opcode::Iget, v(2), v(1), f);
    for i in 0..=u32::from(NO_VALUE) {
        b.instr().constant(Opcode::Const, v(10 + i), i as i32);
    }
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let arena = Bump::new();
    let result = run_gvn(&mut graph, &arena);
    assert!(matches!(
        result,
        Err(GvnError::ValueNameOverflow { allocated }) if allocated >= u32::from(NO_VALUE)
    ));
    assert_eq!(flags(&graph, redundant), OptFlags::empty());
}

#[test]
fn overflow_with_stores_and_merges_fails_softly() {
    let mut b = MirBuilder::new("huge_stores");
    let Fields { f, g } = fields(&mut b);
    let left = b.create_named_block("left");
    let right = b.create_named_block("right");
    let join = b.create_named_block("join");

    // One distinct constant more than there are value names.
    let last = 10 + u32::from(NO_VALUE);
    for i in 10..=last {
        b.instr().constant(Opcode::Const, v(i), i as i32);
    }
    b.instr().iput(Opcode::Iput, v(last), v(0), f);
    b.instr().branch(Opcode::IfEqz, &[v(1)], left, right);

    b.switch_to_block(left);
    b.instr().iput(Opcode::Iput, v(last), v(0), g);
    b.instr().iget(Opcode::Iget, v(2), v(0), f);
    b.instr().goto(join);

    b.switch_to_block(right);
    b.instr().iget(Opcode::Iget, v(3), v(0), f);
    b.instr().goto(join);

    b.switch_to_block(join);
    b.instr().phi(v(4), &[(left, v(2)), (right, v(3))]);
    let load = b.instr().iget(Opcode::Iget, v(5), v(0), f);
    b.instr().return_(Opcode::ReturnVoid, None);
    let mut graph = b.finish();

    let arena = Bump::new();
    let mut discovery = DiscoveringGvn::new(&graph, &arena);
    discovery.run(&graph);
    assert!(!discovery.good());
    assert!(matches!(
        discovery.finalize(),
        Err(GvnError::ValueNameOverflow { .. })
    ));

    let result = run_gvn(&mut graph, &arena);
    assert!(matches!(result, Err(GvnError::ValueNameOverflow { .. })));
    assert_eq!(flags(&graph, load), OptFlags::empty());
}
