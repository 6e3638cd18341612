use crate::{
    formatter::FLAG_NAMES,
    ir::{
        BasicBlock, BasicBlockId, DexFileId, FieldInfo, FieldInfoId, LiteralKind, Mir, MirGraph,
        MirMeta, Opcode, OptFlags, SsaReg,
    },
    passes::dominance::DominanceInfo,
};
use compact_str::{CompactString, ToCompactString};
use cranelift_entity::EntityRef;
use tern_core::{
    HashMap,
    sexpr::{SExpr, SyntaxError},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("expected {expected} in `{context}`")]
    Expected {
        expected: &'static str,
        context: CompactString,
    },
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(CompactString),
    #[error("unknown block `{0}`")]
    UnknownBlock(CompactString),
    #[error("block `{0}` is defined twice")]
    DuplicateBlock(CompactString),
    #[error("unknown field `{0}`")]
    UnknownField(CompactString),
    #[error("unknown flag `{0}`")]
    UnknownFlag(CompactString),
    #[error("malformed register `{0}`")]
    BadRegister(CompactString),
}

/// Decodes the S-expression form of a MIR graph, as produced by
/// [`crate::formatter::format_graph`].
///
/// The first block is the entry block. Predecessors and dominators
/// are recomputed from the successor lists.
pub fn parse_mir(src: &str) -> Result<MirGraph, ParseError> {
    let sexpr = SExpr::parse(src)?;
    let items = sexpr
        .as_tagged("graph")
        .ok_or_else(|| expected("(graph ...)", &sexpr))?;
    let (name, items) = items
        .split_first()
        .ok_or_else(|| expected("graph name", &sexpr))?;
    let name = name.as_symbol().ok_or_else(|| expected("graph name", name))?;

    let mut parser = Parser {
        graph: MirGraph::new(name),
        blocks: HashMap::default(),
        ifields: HashMap::default(),
        sfields: HashMap::default(),
    };
    parser.parse_items(items)?;

    let mut graph = parser.graph;
    graph.compute_predecessors();
    graph.propagate_phi_wideness();
    DominanceInfo::compute(&graph).store_immediate_dominators(&mut graph);
    Ok(graph)
}

fn expected(expected: &'static str, context: &SExpr) -> ParseError {
    let mut context = context.to_compact_string();
    // Multi-line output of large expressions is not useful here.
    if let Some(line) = context.lines().next() {
        context = line.trim().into();
    }
    ParseError::Expected { expected, context }
}

struct Parser {
    graph: MirGraph,
    blocks: HashMap<CompactString, BasicBlockId>,
    ifields: HashMap<CompactString, FieldInfoId>,
    sfields: HashMap<CompactString, FieldInfoId>,
}

impl Parser {
    fn parse_items(&mut self, items: &[SExpr]) -> Result<(), ParseError> {
        // Blocks may be referenced before they are defined,
        // so declare them all up front.
        let mut block_exprs = Vec::new();
        for item in items {
            if let Some(rest) = item.as_tagged("ifield") {
                let (name, info) = parse_field(item, rest)?;
                let id = self.graph.ifields.push(info);
                self.ifields.insert(name, id);
            } else if let Some(rest) = item.as_tagged("sfield") {
                let (name, info) = parse_field(item, rest)?;
                let id = self.graph.sfields.push(info);
                self.sfields.insert(name, id);
            } else if let Some(rest) = item.as_tagged("wide") {
                for reg in rest {
                    let reg = parse_reg(reg)?;
                    self.graph.wide_regs.insert(reg);
                }
            } else if let Some(rest) = item.as_tagged("block") {
                let name = rest
                    .first()
                    .and_then(SExpr::as_symbol)
                    .ok_or_else(|| expected("block name", item))?;
                self.declare_block(name)?;
                block_exprs.push(&rest[1..]);
            } else {
                return Err(expected("ifield, sfield, wide or block", item));
            }
        }

        let mut offset = 0;
        for (block_index, rest) in block_exprs.into_iter().enumerate() {
            let block = BasicBlockId::new(block_index);
            for item in rest {
                if let Some(succs) = item.as_tagged("succ") {
                    for succ in succs {
                        let succ = self.block_ref(succ)?;
                        self.graph.blocks[block].successors.push(succ);
                    }
                } else {
                    let mut mir = self.parse_mir(item)?;
                    mir.offset = offset;
                    offset += 1;
                    if mir.opcode.defines_wide() {
                        for &def in &mir.ssa.defs {
                            self.graph.wide_regs.insert(def);
                        }
                    }
                    let id = self.graph.mirs.push(mir);
                    self.graph.blocks[block].mirs.push(id);
                }
            }
        }
        Ok(())
    }

    fn declare_block(&mut self, name: &str) -> Result<(), ParseError> {
        if self.blocks.contains_key(name) {
            return Err(ParseError::DuplicateBlock(name.into()));
        }
        // `MirGraph::new` already created the entry block.
        let id = if self.blocks.is_empty() {
            self.graph.entry_block
        } else {
            self.graph.blocks.push(BasicBlock::default())
        };
        if self.graph.block_name(id) != name {
            self.graph.blocks[id].name = Some(name.into());
        }
        self.blocks.insert(name.into(), id);
        Ok(())
    }

    fn block_ref(&self, expr: &SExpr) -> Result<BasicBlockId, ParseError> {
        let name = expr
            .as_symbol()
            .ok_or_else(|| expected("block name", expr))?;
        self.blocks
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::UnknownBlock(name.into()))
    }

    fn parse_mir(&self, expr: &SExpr) -> Result<Mir, ParseError> {
        let (head, rest) = expr
            .as_list()
            .and_then(<[SExpr]>::split_first)
            .ok_or_else(|| expected("instruction", expr))?;
        let name = head
            .as_symbol()
            .ok_or_else(|| expected("opcode", expr))?;
        let opcode =
            Opcode::from_name(name).ok_or_else(|| ParseError::UnknownOpcode(name.into()))?;

        let mut mir = Mir::new(opcode);
        for operand in rest {
            let (tag, args) = operand
                .as_list()
                .and_then(<[SExpr]>::split_first)
                .and_then(|(tag, args)| Some((tag.as_symbol()?, args)))
                .ok_or_else(|| expected("operand list", operand))?;
            match tag {
                "def" => {
                    for arg in args {
                        mir.ssa.defs.push(parse_reg(arg)?);
                    }
                }
                "use" => {
                    for arg in args {
                        mir.ssa.uses.push(parse_reg(arg)?);
                    }
                }
                "lit" => {
                    let value = match args {
                        [SExpr::Int(value)] => *value,
                        _ => return Err(expected("integer literal", operand)),
                    };
                    match opcode.literal_kind() {
                        LiteralKind::None => return Err(expected("no literal", expr)),
                        LiteralKind::B => mir.v_b = value as u32,
                        LiteralKind::Wide => mir.v_b_wide = value as u64,
                        LiteralKind::C => mir.v_c = value as u32,
                    }
                }
                "field" => {
                    let name = match args {
                        [SExpr::Symbol(name)] => name,
                        _ => return Err(expected("field name", operand)),
                    };
                    mir.meta = if opcode.is_instance_field_access() {
                        MirMeta::IField(self.field_ref(&self.ifields, name)?)
                    } else if opcode.is_static_field_access() {
                        MirMeta::SField(self.field_ref(&self.sfields, name)?)
                    } else {
                        return Err(expected("field access opcode", expr));
                    };
                }
                "incoming" => {
                    let blocks = args
                        .iter()
                        .map(|arg| self.block_ref(arg))
                        .collect::<Result<_, _>>()?;
                    mir.meta = MirMeta::PhiIncoming(blocks);
                }
                "flags" => {
                    for arg in args {
                        mir.optimization_flags |= parse_flag(arg)?;
                    }
                }
                _ => return Err(expected("def, use, lit, field, incoming or flags", operand)),
            }
        }
        Ok(mir)
    }

    fn field_ref(
        &self,
        fields: &HashMap<CompactString, FieldInfoId>,
        name: &str,
    ) -> Result<FieldInfoId, ParseError> {
        fields
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::UnknownField(name.into()))
    }
}

/// `(ifield f0 (file 0) (idx 1) [volatile])` or `(ifield f0 unresolved)`.
fn parse_field(expr: &SExpr, rest: &[SExpr]) -> Result<(CompactString, FieldInfo), ParseError> {
    let (name, attrs) = rest
        .split_first()
        .ok_or_else(|| expected("field name", expr))?;
    let name = name.as_symbol().ok_or_else(|| expected("field name", expr))?;

    let mut file = None;
    let mut idx = None;
    let mut volatile = false;
    let mut unresolved = false;
    for attr in attrs {
        match attr {
            SExpr::Symbol(s) if s == "volatile" => volatile = true,
            SExpr::Symbol(s) if s == "unresolved" => unresolved = true,
            _ => {
                if let Some([SExpr::Int(x)]) = attr.as_tagged("file") {
                    file = Some(DexFileId::new(*x as usize));
                } else if let Some([SExpr::Int(x)]) = attr.as_tagged("idx") {
                    idx = Some(*x as u32);
                } else {
                    return Err(expected("file, idx, volatile or unresolved", attr));
                }
            }
        }
    }

    let info = match (unresolved, file) {
        (true, _) => FieldInfo::unresolved(),
        (false, Some(file)) => {
            let idx = idx.ok_or_else(|| expected("(idx n)", expr))?;
            if volatile {
                FieldInfo::resolved_volatile(file, idx)
            } else {
                FieldInfo::resolved(file, idx)
            }
        }
        (false, None) => return Err(expected("(file n) or unresolved", expr)),
    };
    Ok((name.into(), info))
}

fn parse_reg(expr: &SExpr) -> Result<SsaReg, ParseError> {
    let name = expr.as_symbol().ok_or_else(|| expected("register", expr))?;
    name.strip_prefix('v')
        .and_then(|n| n.parse::<u32>().ok())
        .map(SsaReg::from_u32)
        .ok_or_else(|| ParseError::BadRegister(name.into()))
}

fn parse_flag(expr: &SExpr) -> Result<OptFlags, ParseError> {
    let name = expr.as_symbol().ok_or_else(|| expected("flag", expr))?;
    FLAG_NAMES
        .iter()
        .find(|(flag_name, _)| *flag_name == name)
        .map(|&(_, flag)| flag)
        .ok_or_else(|| ParseError::UnknownFlag(name.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::format_graph;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tern_core::sexpr::SyntaxErrorKind;

    const LOOP: &str = indoc! {"
        // A counted loop.
        (graph count
            (ifield f0 (file 0) (idx 3))
            (sfield f0 unresolved)
            (wide v9)
            (block entry
                (succ header)
                (const/4 (def v1) (lit 0))
                (goto))
            (block header
                (succ exit body)
                (phi (def v2) (use v1 v3) (incoming entry body))
                (iget (def v4) (use v0) (field f0) (flags ignore-null-check))
                (if-ge (use v2 v4)))
            (block body
                (succ header)
                (add-int/lit8 (def v3) (use v2) (lit 1))
                (sput-wide (use v9) (field f0))
                (goto))
            (block exit
                (return (use v2))))
    "};

    #[test]
    fn parses_structure() {
        let graph = parse_mir(LOOP).unwrap();
        assert_eq!(graph.name, "count");
        assert_eq!(graph.blocks.len(), 4);
        assert_eq!(graph.block_name(graph.entry_block), "entry");

        let header = BasicBlockId::new(1);
        let body = BasicBlockId::new(2);
        assert_eq!(
            graph.blocks[header].predecessors.as_slice(),
            &[graph.entry_block, body]
        );
        assert_eq!(graph.blocks[body].i_dom, Some(header));

        let iget = &graph.mirs[graph.blocks[header].mirs[1]];
        assert_eq!(iget.opcode, Opcode::Iget);
        assert_eq!(iget.optimization_flags, OptFlags::IGNORE_NULL_CHECK);
        assert_eq!(graph.field_info(iget).unwrap().declaring_field_idx, 3);

        let add = &graph.mirs[graph.blocks[body].mirs[0]];
        assert_eq!(add.v_c, 1);
        assert!(graph.is_wide(SsaReg::from_u32(9)));
        assert!(!graph.is_wide(SsaReg::from_u32(2)));
    }

    #[test]
    fn format_then_parse_is_stable() {
        let graph = parse_mir(LOOP).unwrap();
        let formatted = format_graph(&graph).to_string();
        let reparsed = parse_mir(&formatted).unwrap();
        assert_eq!(format_graph(&reparsed).to_string(), formatted);
    }

    #[test]
    fn reports_errors() {
        assert_eq!(
            parse_mir("(graph f").map(|_| ()),
            Err(ParseError::Syntax(SyntaxError {
                offset: 0,
                kind: SyntaxErrorKind::UnterminatedList,
            }))
        );
        assert_eq!(
            parse_mir("(graph f (block b0 (frobnicate)))").map(|_| ()),
            Err(ParseError::UnknownOpcode("frobnicate".into()))
        );
        assert_eq!(
            parse_mir("(graph f (block b0 (succ nowhere) (goto)))").map(|_| ()),
            Err(ParseError::UnknownBlock("nowhere".into()))
        );
        assert_eq!(
            parse_mir("(graph f (block b0 (return (use x1))))").map(|_| ()),
            Err(ParseError::BadRegister("x1".into()))
        );
        assert_eq!(
            parse_mir("(graph f (block b0 (goto)) (block b0 (goto)))").map(|_| ()),
            Err(ParseError::DuplicateBlock("b0".into()))
        );
    }
}
