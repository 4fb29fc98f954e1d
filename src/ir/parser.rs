//! Textual IR parser (§6 "IR textual format", §7 "Parsing (IR text)").
//!
//! A hand-written lexer and recursive-descent parser for the grammar
//! [`crate::ir::printer`] produces. Issues are collected into a
//! [`crate::common::error::DiagnosticEngine`] rather than raised
//! individually, so a single `parse_module` call surfaces every lexical,
//! syntactic, or semantic (e.g. redeclaration) problem in the input, per
//! §7's "Parsing may continue after a recoverable issue to collect more".

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::fx_hash::FxHashMap;
use crate::common::source::Span;
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId, Param, ParamAttribute};
use crate::ir::instruction::{FloatPredicate, GepIndex, Instruction, IntPredicate, Opcode};
use crate::ir::module::{Module, Mutability};
use crate::ir::types::{FloatPrecision, TypeId};
use crate::ir::value::{ConstId, ValueRef};
use smallvec::SmallVec;

/// Lexical, syntactic, or semantic parse failure (§7.1 "ir::parser::ParseError").
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected character {0:?}")]
    Lexical(char),
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    Semantic(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Reg(String),
    At(String),
    Int(i64),
    Float(f64),
    Comma,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eq,
    Hash,
    Eof,
}

struct Lexed {
    tok: Token,
    span: Span,
}

fn lex(src: &str, file_id: u32) -> (Vec<Lexed>, Vec<(Span, char)>) {
    let bytes = src.as_bytes();
    let mut i = 0usize;
    let mut out = Vec::new();
    let mut errors = Vec::new();
    let is_ident_start = |c: u8| c.is_ascii_alphabetic() || c == b'_' || c == b'.';
    let is_ident_continue = |c: u8| c.is_ascii_alphanumeric() || c == b'_' || c == b'.';

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b',' => {
                out.push(Lexed { tok: Token::Comma, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b':' => {
                out.push(Lexed { tok: Token::Colon, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'(' => {
                out.push(Lexed { tok: Token::LParen, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b')' => {
                out.push(Lexed { tok: Token::RParen, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'{' => {
                out.push(Lexed { tok: Token::LBrace, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'}' => {
                out.push(Lexed { tok: Token::RBrace, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'[' => {
                out.push(Lexed { tok: Token::LBracket, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b']' => {
                out.push(Lexed { tok: Token::RBracket, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'=' => {
                out.push(Lexed { tok: Token::Eq, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'#' => {
                out.push(Lexed { tok: Token::Hash, span: Span::new(i as u32, i as u32 + 1, file_id) });
                i += 1;
            }
            b'%' => {
                let start = i;
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                let name = src[name_start..i].to_string();
                out.push(Lexed { tok: Token::Reg(name), span: Span::new(start as u32, i as u32, file_id) });
            }
            b'@' => {
                let start = i;
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                let name = src[name_start..i].to_string();
                out.push(Lexed { tok: Token::At(name), span: Span::new(start as u32, i as u32, file_id) });
            }
            b'-' | b'0'..=b'9' => {
                let start = i;
                if c == b'-' {
                    i += 1;
                }
                let digits_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i < bytes.len() && bytes[i] == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if digits_start == i {
                    errors.push((Span::new(start as u32, i as u32 + 1, file_id), c as char));
                    i += 1;
                    continue;
                }
                let text = &src[start..i];
                if is_float {
                    let v: f64 = text.parse().unwrap_or(0.0);
                    out.push(Lexed { tok: Token::Float(v), span: Span::new(start as u32, i as u32, file_id) });
                } else {
                    let v: i64 = text.parse().unwrap_or(0);
                    out.push(Lexed { tok: Token::Int(v), span: Span::new(start as u32, i as u32, file_id) });
                }
            }
            _ if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                out.push(Lexed {
                    tok: Token::Ident(src[start..i].to_string()),
                    span: Span::new(start as u32, i as u32, file_id),
                });
            }
            other => {
                errors.push((Span::new(i as u32, i as u32 + 1, file_id), other as char));
                i += 1;
            }
        }
    }
    out.push(Lexed { tok: Token::Eof, span: Span::new(bytes.len() as u32, bytes.len() as u32, file_id) });
    (out, errors)
}

/// A value reference awaiting resolution: instructions may forward-reference
/// registers defined later in the same function (loop back-edges via phi),
/// so every operand is parsed as a name first and resolved once the whole
/// function body has been walked.
#[derive(Debug, Clone)]
enum PendingRef {
    Named(String),
    ParamIndex(u32),
    Block(String),
    Const(ConstId),
    Global(String),
    Function(String),
}

struct PendingInst {
    id: InstId,
    opcode: PendingOpcode,
    operand_refs: Vec<PendingRef>,
    ty: TypeId,
    name: Option<String>,
}

enum PendingOpcode {
    Plain(Opcode),
    Phi(Vec<String>),
    /// GEP indices may mix constant offsets with dynamic operands; dynamic
    /// slots index into the instruction's resolved `operands` vector (base
    /// is always slot 0) since [`GepIndex::Dynamic`] embeds the resolved
    /// value directly rather than an operand-list index.
    Gep(TypeId, Vec<GepSlot>),
}

#[derive(Debug, Clone)]
enum GepSlot {
    Constant(i64),
    DynamicOperand(usize),
}

pub struct Parser<'s> {
    toks: Vec<Lexed>,
    pos: usize,
    src: &'s str,
    diags: DiagnosticEngine,
    cx: Context,
    module: Module,
    named_structs: FxHashMap<String, TypeId>,
}

impl<'s> Parser<'s> {
    fn peek(&self) -> &Token {
        &self.toks[self.pos].tok
    }

    fn span(&self) -> Span {
        self.toks[self.pos].span
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn error(&mut self, msg: impl Into<String>) {
        let err = ParseError::Syntax(msg.into());
        self.diags.emit(Diagnostic::error(err.to_string(), self.span()));
    }

    /// Like [`Self::error`] but for issues only detectable after parsing a
    /// complete item (redeclarations, dangling references) rather than
    /// malformed token sequences.
    fn error_semantic(&mut self, msg: impl Into<String>) {
        let err = ParseError::Semantic(msg.into());
        self.diags.emit(Diagnostic::error(err.to_string(), self.span()));
    }

    fn expect_ident(&mut self, expect: &str) -> bool {
        if let Token::Ident(s) = self.peek() {
            if s == expect {
                self.bump();
                return true;
            }
        }
        self.error(format!("expected `{expect}`"));
        false
    }

    fn expect(&mut self, t: &Token) -> bool {
        if self.peek() == t {
            self.bump();
            true
        } else {
            self.error(format!("expected {t:?}, found {:?}", self.peek()));
            false
        }
    }

    fn at_ident(&self, s: &str) -> bool {
        matches!(self.peek(), Token::Ident(i) if i == s)
    }

    // -- types --------------------------------------------------------------

    fn parse_type(&mut self) -> TypeId {
        match self.bump() {
            Token::Ident(s) => {
                if let Some(bits) = s.strip_prefix('i').and_then(|b| b.parse::<u32>().ok()) {
                    return self.cx.int_type(bits);
                }
                match s.as_str() {
                    "f32" => self.cx.float_type(FloatPrecision::F32),
                    "f64" => self.cx.float_type(FloatPrecision::F64),
                    "ptr" => self.cx.ptr_type(),
                    "void" => self.cx.void_type(),
                    _ => {
                        self.error(format!("unknown type keyword `{s}`"));
                        self.cx.void_type()
                    }
                }
            }
            Token::At(name) => {
                if let Some(&id) = self.named_structs.get(&name) {
                    id
                } else {
                    self.error_semantic(format!("reference to undeclared struct `@{name}`"));
                    self.cx.void_type()
                }
            }
            Token::LBrace => {
                let mut members = Vec::new();
                if self.peek() != &Token::RBrace {
                    loop {
                        members.push(self.parse_type());
                        if self.peek() == &Token::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace);
                self.cx.anonymous_struct(members)
            }
            Token::LBracket => {
                let count = match self.bump() {
                    Token::Int(v) => v as u64,
                    other => {
                        self.error(format!("expected array length, found {other:?}"));
                        0
                    }
                };
                self.expect_ident("x");
                let elem = self.parse_type();
                self.expect(&Token::RBracket);
                self.cx.array_type(elem, count)
            }
            other => {
                self.error(format!("expected a type, found {other:?}"));
                self.cx.void_type()
            }
        }
    }

    // -- constants ------------------------------------------------------------

    fn parse_constant(&mut self) -> ConstId {
        let ty = self.parse_type();
        self.parse_constant_body(ty)
    }

    fn parse_constant_body(&mut self, ty: TypeId) -> ConstId {
        match self.peek().clone() {
            Token::Ident(s) if s == "null" => {
                self.bump();
                self.cx.null_constant()
            }
            Token::Ident(s) if s == "undef" => {
                self.bump();
                self.cx.undef(ty)
            }
            Token::LBrace => {
                self.bump();
                let mut elems = Vec::new();
                if self.peek() != &Token::RBrace {
                    loop {
                        elems.push(self.parse_constant());
                        if self.peek() == &Token::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace);
                self.cx.record_constant(ty, elems)
            }
            Token::Int(v) => {
                self.bump();
                if matches!(self.cx.type_of(ty), crate::ir::types::Type::Float(_)) {
                    self.cx.float_constant(self.float_precision_of(ty), v as f64)
                } else {
                    self.cx.int_constant_of_type(ty, v as u64)
                }
            }
            Token::Float(v) => {
                self.bump();
                self.cx.float_constant(self.float_precision_of(ty), v)
            }
            other => {
                self.error(format!("expected a constant literal, found {other:?}"));
                self.cx.undef(ty)
            }
        }
    }

    fn float_precision_of(&self, ty: TypeId) -> FloatPrecision {
        match self.cx.type_of(ty) {
            crate::ir::types::Type::Float(p) => *p,
            _ => FloatPrecision::F64,
        }
    }

    // -- top level ------------------------------------------------------------

    fn parse_module(&mut self) {
        loop {
            match self.peek().clone() {
                Token::Eof => break,
                Token::Ident(s) if s == "struct" => self.parse_struct_decl(),
                Token::Ident(s) if s == "ext" => self.parse_foreign_function(),
                Token::Ident(s) if s == "func" => self.parse_function(),
                Token::At(_) => self.parse_global(),
                other => {
                    self.error(format!("expected a top-level item, found {other:?}"));
                    self.bump();
                }
            }
        }
    }

    fn parse_struct_decl(&mut self) {
        self.expect_ident("struct");
        let name = match self.bump() {
            Token::At(n) => n,
            other => {
                self.error(format!("expected struct name, found {other:?}"));
                return;
            }
        };
        self.expect(&Token::LBrace);
        let mut members = Vec::new();
        if self.peek() != &Token::RBrace {
            loop {
                members.push(self.parse_type());
                if self.peek() == &Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RBrace);
        if self.named_structs.contains_key(&name) {
            self.error_semantic(format!("redeclaration of struct `@{name}`"));
            return;
        }
        let id = self.cx.named_struct(name.clone(), members);
        self.named_structs.insert(name, id);
    }

    fn parse_global(&mut self) {
        let name = match self.bump() {
            Token::At(n) => n,
            _ => unreachable!("caller checked for At"),
        };
        self.expect(&Token::Eq);
        let mutability = match self.bump() {
            Token::Ident(s) if s == "global" => Mutability::Mutable,
            Token::Ident(s) if s == "constant" => Mutability::Constant,
            other => {
                self.error(format!("expected `global` or `constant`, found {other:?}"));
                Mutability::Mutable
            }
        };
        let ty = self.parse_type();
        let init = self.parse_constant();
        if self.module.find_global(&name).is_some() {
            self.error_semantic(format!("redeclaration of global `@{name}`"));
            return;
        }
        self.module.declare_global(name, ty, mutability, init);
    }

    fn parse_foreign_function(&mut self) {
        self.expect_ident("ext");
        self.expect_ident("func");
        let ret_ty = self.parse_type();
        let name = match self.bump() {
            Token::At(n) => n,
            other => {
                self.error(format!("expected function name, found {other:?}"));
                return;
            }
        };
        self.expect(&Token::LParen);
        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                let ty = self.parse_type();
                params.push(Param { ty, name: String::new(), attribute: None });
                if self.peek() == &Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen);
        if self.module.find_function(&name).is_some() {
            self.error_semantic(format!("redeclaration of function `@{name}`"));
            return;
        }
        self.module.declare_function(name, ret_ty, params, true);
    }

    fn parse_function(&mut self) {
        self.expect_ident("func");
        let ret_ty = self.parse_type();
        let name = match self.bump() {
            Token::At(n) => n,
            other => {
                self.error(format!("expected function name, found {other:?}"));
                return;
            }
        };
        self.expect(&Token::LParen);
        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                let ty = self.parse_type();
                if !matches!(self.peek(), Token::Reg(_)) {
                    self.error(format!("expected a parameter register, found {:?}", self.peek()));
                } else {
                    self.bump();
                }
                let attribute = self.parse_optional_param_attribute();
                params.push(Param { ty, name: String::new(), attribute });
                if self.peek() == &Token::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen);
        if self.module.find_function(&name).is_some() {
            self.error_semantic(format!("redeclaration of function `@{name}`"));
            self.skip_braced_block();
            return;
        }
        let func = self.module.declare_function(name, ret_ty, params, false);
        self.expect(&Token::LBrace);
        self.parse_function_body(func);
        self.expect(&Token::RBrace);
    }

    fn parse_optional_param_attribute(&mut self) -> Option<ParamAttribute> {
        if self.at_ident("byval") {
            self.bump();
            self.expect(&Token::LParen);
            let t = self.parse_type();
            self.expect(&Token::RParen);
            Some(ParamAttribute::ByVal(t))
        } else if self.at_ident("valret") {
            self.bump();
            self.expect(&Token::LParen);
            let t = self.parse_type();
            self.expect(&Token::RParen);
            Some(ParamAttribute::ValRet(t))
        } else {
            None
        }
    }

    fn skip_braced_block(&mut self) {
        if self.peek() != &Token::LBrace {
            return;
        }
        self.bump();
        let mut depth = 1;
        loop {
            match self.bump() {
                Token::LBrace => depth += 1,
                Token::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof => break,
                _ => {}
            }
        }
    }

    /// Parses every block and instruction of a function body, resolving
    /// operand references only after every block/instruction name is known
    /// (loop back-edges and phi operands may forward-reference).
    fn parse_function_body(&mut self, func: FuncId) {
        let mut block_names: FxHashMap<String, BlockId> = FxHashMap::default();
        let mut pending: Vec<(BlockId, Vec<PendingInst>)> = Vec::new();

        while matches!(self.peek(), Token::Ident(_)) && self.peek_is_block_label() {
            let name = match self.bump() {
                Token::Ident(n) => n,
                _ => unreachable!(),
            };
            self.expect(&Token::Colon);
            let block = self.module.function_mut(func).push_block(name.clone());
            block_names.insert(name, block);
            let insts = self.parse_block_insts(func);
            pending.push((block, insts));
        }

        // Resolve names: instruction results and parameters first.
        let mut value_names: FxHashMap<String, InstId> = FxHashMap::default();
        for (_, insts) in &pending {
            for inst in insts {
                if let Some(name) = &inst.name {
                    value_names.insert(name.clone(), inst.id);
                }
            }
        }

        for (block, insts) in pending {
            for pending_inst in insts {
                let operands: SmallVec<[ValueRef; 3]> = pending_inst
                    .operand_refs
                    .iter()
                    .map(|r| self.resolve_ref(func, r, &value_names, &block_names))
                    .collect();
                let opcode = match pending_inst.opcode {
                    PendingOpcode::Plain(op) => op,
                    PendingOpcode::Phi(ref blocks) => {
                        let incoming = blocks
                            .iter()
                            .map(|b| block_names.get(b).copied().unwrap_or_else(|| {
                                self.error(format!("phi references undeclared block `{b}`"));
                                block
                            }))
                            .collect();
                        Opcode::Phi { incoming }
                    }
                    PendingOpcode::Gep(elem_ty, ref slots) => {
                        let indices = slots
                            .iter()
                            .map(|s| match s {
                                GepSlot::Constant(c) => GepIndex::Constant(*c),
                                GepSlot::DynamicOperand(i) => GepIndex::Dynamic(operands[*i]),
                            })
                            .collect();
                        Opcode::GetElementPointer { elem_ty, indices }
                    }
                };
                let inst = Instruction {
                    id: pending_inst.id,
                    opcode,
                    operands,
                    ty: pending_inst.ty,
                    name: pending_inst.name,
                    parent: block,
                    pointer_info: None,
                };
                self.install_instruction(func, block, inst);
            }
        }
    }

    /// Installs a fully-resolved instruction, registering its operands'
    /// use edges and wiring terminator CFG edges, mirroring
    /// [`crate::ir::builder::IrBuilder::insert`] but without reallocating a
    /// fresh [`InstId`] (the parser pre-assigns ids during the first walk
    /// so phi/forward references resolve to stable ids).
    fn install_instruction(&mut self, func: FuncId, block: BlockId, inst: Instruction) {
        let id = inst.id;
        let is_term = inst.is_terminator();
        let operands: Vec<ValueRef> = inst.operands.to_vec();
        {
            let f = self.module.function_mut(func);
            f.insts[id.index()] = Some(inst);
        }
        for op in operands {
            self.module.add_use(op, (func, id));
        }
        if is_term {
            let targets = terminator_targets(self.module.function(func).inst(id));
            let f = self.module.function_mut(func);
            f.block_mut(block).succs = targets.clone();
            for t in targets {
                f.block_mut(t).preds.insert(block);
            }
        }
    }

    fn peek_is_block_label(&self) -> bool {
        matches!(self.toks.get(self.pos + 1).map(|l| &l.tok), Some(Token::Colon))
    }

    fn parse_block_insts(&mut self, func: FuncId) -> Vec<PendingInst> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Token::Reg(_) | Token::Ident(_) => {
                    if matches!(self.peek(), Token::Ident(_)) && self.peek_is_block_label() {
                        break;
                    }
                }
                _ => break,
            }
            out.push(self.parse_instruction(func));
        }
        out
    }

    fn parse_instruction(&mut self, func: FuncId) -> PendingInst {
        let name = if matches!(self.peek(), Token::Reg(_)) {
            let n = match self.bump() {
                Token::Reg(n) => n,
                _ => unreachable!(),
            };
            self.expect(&Token::Eq);
            Some(n)
        } else {
            None
        };
        let opword = match self.bump() {
            Token::Ident(s) => s,
            other => {
                self.error(format!("expected an opcode, found {other:?}"));
                String::new()
            }
        };
        let id = {
            let f = self.module.function_mut(func);
            let placeholder = Instruction {
                id: InstId(0),
                opcode: Opcode::Return,
                operands: SmallVec::new(),
                ty: self.cx.void_type(),
                name: None,
                parent: BlockId(0),
                pointer_info: None,
            };
            f.alloc_inst(placeholder)
        };
        let (opcode, ty, operand_refs) = self.parse_opcode_body(&opword);
        self.parse_optional_pointer_info();
        PendingInst { id, opcode, operand_refs, ty, name }
    }

    fn parse_optional_pointer_info(&mut self) {
        if self.peek() != &Token::Hash {
            return;
        }
        self.bump();
        self.expect_ident("ptr");
        self.expect(&Token::LParen);
        while self.peek() != &Token::RParen && self.peek() != &Token::Eof {
            self.bump();
        }
        self.expect(&Token::RParen);
    }

    /// Parses a value operand: a register/param reference, a global or
    /// function name, or (anything else) a type-prefixed constant literal
    /// such as `i32 5` or `ptr null` — the same grammar
    /// [`crate::ir::printer::operand_text`] produces for [`ValueRef::Const`].
    fn parse_ref_operand(&mut self) -> PendingRef {
        match self.peek().clone() {
            Token::Reg(_) => match self.bump() {
                Token::Reg(n) => {
                    if let Ok(idx) = n.parse::<u32>() {
                        PendingRef::ParamIndex(idx)
                    } else {
                        PendingRef::Named(n)
                    }
                }
                _ => unreachable!(),
            },
            Token::At(_) => match self.bump() {
                Token::At(n) => PendingRef::Global(n),
                _ => unreachable!(),
            },
            _ => {
                let ty = self.parse_type();
                let c = self.parse_constant_body(ty);
                PendingRef::Const(c)
            }
        }
    }

    /// Parses a bare block-name operand, used only for branch targets (goto,
    /// branch) which the printer emits as the plain block name with no type
    /// prefix.
    fn parse_block_ref(&mut self) -> PendingRef {
        match self.bump() {
            Token::Ident(n) => PendingRef::Block(n),
            other => {
                self.error(format!("expected a block name, found {other:?}"));
                PendingRef::Block(String::new())
            }
        }
    }

    fn parse_opcode_body(&mut self, opword: &str) -> (PendingOpcode, TypeId, Vec<PendingRef>) {
        match opword {
            "icmp" | "fcmp" => {
                let pred_word = match self.bump() {
                    Token::Ident(s) => s,
                    other => {
                        self.error(format!("expected a comparison predicate, found {other:?}"));
                        String::new()
                    }
                };
                let ty = self.parse_type();
                let a = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let b = self.parse_ref_operand();
                let opcode = if opword == "icmp" {
                    Opcode::ICmp(int_predicate_from_str(&pred_word))
                } else {
                    Opcode::FCmp(float_predicate_from_str(&pred_word))
                };
                (PendingOpcode::Plain(opcode), ty, vec![a, b])
            }
            "alloca" => {
                let result_ty = self.parse_type();
                let elem_ty = self.parse_type();
                self.expect(&Token::Comma);
                let count = match self.bump() {
                    Token::Int(v) => v as u64,
                    other => {
                        self.error(format!("expected alloca count, found {other:?}"));
                        1
                    }
                };
                (PendingOpcode::Plain(Opcode::Alloca { elem_ty, count }), result_ty, vec![])
            }
            "gep" => {
                let result_ty = self.parse_type();
                let elem_ty = self.parse_type();
                self.expect(&Token::Comma);
                let base = self.parse_ref_operand();
                let mut operands = vec![base];
                let mut slots = Vec::new();
                while self.peek() == &Token::Comma {
                    self.bump();
                    match self.peek().clone() {
                        Token::Int(v) => {
                            self.bump();
                            slots.push(GepSlot::Constant(v));
                        }
                        _ => {
                            operands.push(self.parse_ref_operand());
                            slots.push(GepSlot::DynamicOperand(operands.len() - 1));
                        }
                    }
                }
                (PendingOpcode::Gep(elem_ty, slots), result_ty, operands)
            }
            "extract_value" | "insert_value" => {
                let result_ty = self.parse_type();
                let mut operands = Vec::new();
                operands.push(self.parse_ref_operand());
                if opword == "insert_value" {
                    self.expect(&Token::Comma);
                    operands.push(self.parse_ref_operand());
                }
                let mut indices = Vec::new();
                while self.peek() == &Token::Comma {
                    self.bump();
                    match self.bump() {
                        Token::Int(v) => indices.push(v as u32),
                        other => self.error(format!("expected an index, found {other:?}")),
                    }
                }
                let opcode = if opword == "extract_value" {
                    Opcode::ExtractValue { indices }
                } else {
                    Opcode::InsertValue { indices }
                };
                (PendingOpcode::Plain(opcode), result_ty, operands)
            }
            "phi" => {
                let ty = self.parse_type();
                let mut operands = Vec::new();
                let mut blocks = Vec::new();
                loop {
                    if self.peek() != &Token::LBracket {
                        break;
                    }
                    self.bump();
                    operands.push(self.parse_ref_operand());
                    self.expect(&Token::Comma);
                    let block_name = match self.bump() {
                        Token::Ident(n) => n,
                        other => {
                            self.error(format!("expected block name, found {other:?}"));
                            String::new()
                        }
                    };
                    blocks.push(block_name);
                    self.expect(&Token::RBracket);
                    if self.peek() == &Token::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
                (PendingOpcode::Phi(blocks), ty, operands)
            }
            "goto" => {
                let ty = self.parse_type();
                let target = self.parse_block_ref();
                (PendingOpcode::Plain(Opcode::Goto), ty, vec![target])
            }
            "branch" => {
                let ty = self.parse_type();
                let cond = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let then_t = self.parse_block_ref();
                self.expect(&Token::Comma);
                let else_t = self.parse_block_ref();
                (PendingOpcode::Plain(Opcode::Branch), ty, vec![cond, then_t, else_t])
            }
            "return" => {
                let ty = self.parse_type();
                let mut operands = Vec::new();
                if !self.cx.type_of(ty).is_void() {
                    operands.push(self.parse_ref_operand());
                }
                (PendingOpcode::Plain(Opcode::Return), ty, operands)
            }
            "select" => {
                let ty = self.parse_type();
                let cond = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let then_v = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let else_v = self.parse_ref_operand();
                (PendingOpcode::Plain(Opcode::Select), ty, vec![cond, then_v, else_v])
            }
            "call" => {
                let ty = self.parse_type();
                let callee = self.parse_ref_operand();
                let mut operands = vec![callee];
                while self.peek() == &Token::Comma {
                    self.bump();
                    operands.push(self.parse_ref_operand());
                }
                (PendingOpcode::Plain(Opcode::Call), ty, operands)
            }
            "load" => {
                let ty = self.parse_type();
                let addr = self.parse_ref_operand();
                (PendingOpcode::Plain(Opcode::Load), ty, vec![addr])
            }
            "store" => {
                let ty = self.parse_type();
                let value = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let addr = self.parse_ref_operand();
                (PendingOpcode::Plain(Opcode::Store), ty, vec![value, addr])
            }
            unary if UNARY_OPS.contains(&unary) => {
                let ty = self.parse_type();
                let a = self.parse_ref_operand();
                (PendingOpcode::Plain(unary_opcode(unary)), ty, vec![a])
            }
            binary if BINARY_OPS.contains(&binary) => {
                let ty = self.parse_type();
                let a = self.parse_ref_operand();
                self.expect(&Token::Comma);
                let b = self.parse_ref_operand();
                (PendingOpcode::Plain(binary_opcode(binary)), ty, vec![a, b])
            }
            conv if CONVERSION_OPS.contains(&conv) => {
                let ty = self.parse_type();
                let a = self.parse_ref_operand();
                (PendingOpcode::Plain(conversion_opcode(conv)), ty, vec![a])
            }
            other => {
                self.error(format!("unknown opcode `{other}`"));
                let ty = self.cx.void_type();
                (PendingOpcode::Plain(Opcode::Return), ty, vec![])
            }
        }
    }

    fn resolve_ref(
        &mut self,
        func: FuncId,
        r: &PendingRef,
        value_names: &FxHashMap<String, InstId>,
        block_names: &FxHashMap<String, BlockId>,
    ) -> ValueRef {
        match r {
            PendingRef::Named(n) => {
                if let Some(&id) = value_names.get(n) {
                    ValueRef::Inst(func, id)
                } else {
                    self.error_semantic(format!("reference to undefined value `%{n}`"));
                    ValueRef::Const(self.cx.undef(self.cx.void_type()))
                }
            }
            PendingRef::ParamIndex(idx) => {
                if (*idx as usize) < self.module.function(func).params.len() {
                    ValueRef::Param(func, *idx)
                } else {
                    self.error(format!("parameter index %{idx} out of range"));
                    ValueRef::Const(self.cx.undef(self.cx.void_type()))
                }
            }
            PendingRef::Block(n) => {
                if let Some(&b) = block_names.get(n) {
                    ValueRef::Block(func, b)
                } else {
                    self.error_semantic(format!("reference to undeclared block `{n}`"));
                    ValueRef::Block(func, BlockId(0))
                }
            }
            PendingRef::Const(c) => ValueRef::Const(*c),
            PendingRef::Global(n) => {
                if let Some(g) = self.module.find_global(n) {
                    ValueRef::Global(g)
                } else if let Some(f) = self.module.find_function(n) {
                    ValueRef::Function(f)
                } else {
                    self.error_semantic(format!("reference to undeclared global or function `@{n}`"));
                    ValueRef::Const(self.cx.undef(self.cx.void_type()))
                }
            }
            PendingRef::Function(n) => {
                if let Some(f) = self.module.find_function(n) {
                    ValueRef::Function(f)
                } else {
                    self.error_semantic(format!("reference to undeclared function `@{n}`"));
                    ValueRef::Const(self.cx.undef(self.cx.void_type()))
                }
            }
        }
    }
}

const UNARY_OPS: &[&str] = &["neg", "fneg", "not"];
const BINARY_OPS: &[&str] = &[
    "add", "sub", "mul", "sdiv", "udiv", "srem", "urem", "and", "or", "xor", "shl", "lshr", "ashr", "fadd", "fsub",
    "fmul", "fdiv",
];
const CONVERSION_OPS: &[&str] = &[
    "trunc", "zext", "sext", "fptrunc", "fpext", "ftoui", "ftosi", "uitof", "sitof", "bitcast", "ptrtoint", "inttoptr",
];

fn unary_opcode(s: &str) -> Opcode {
    match s {
        "neg" => Opcode::Neg,
        "fneg" => Opcode::FNeg,
        "not" => Opcode::Not,
        _ => unreachable!(),
    }
}

fn binary_opcode(s: &str) -> Opcode {
    match s {
        "add" => Opcode::Add,
        "sub" => Opcode::Sub,
        "mul" => Opcode::Mul,
        "sdiv" => Opcode::SDiv,
        "udiv" => Opcode::UDiv,
        "srem" => Opcode::SRem,
        "urem" => Opcode::URem,
        "and" => Opcode::And,
        "or" => Opcode::Or,
        "xor" => Opcode::Xor,
        "shl" => Opcode::Shl,
        "lshr" => Opcode::LShr,
        "ashr" => Opcode::AShr,
        "fadd" => Opcode::FAdd,
        "fsub" => Opcode::FSub,
        "fmul" => Opcode::FMul,
        "fdiv" => Opcode::FDiv,
        _ => unreachable!(),
    }
}

fn conversion_opcode(s: &str) -> Opcode {
    match s {
        "trunc" => Opcode::Trunc,
        "zext" => Opcode::ZExt,
        "sext" => Opcode::SExt,
        "fptrunc" => Opcode::FPTrunc,
        "fpext" => Opcode::FPExt,
        "ftoui" => Opcode::FToUI,
        "ftosi" => Opcode::FToSI,
        "uitof" => Opcode::UIToF,
        "sitof" => Opcode::SIToF,
        "bitcast" => Opcode::Bitcast,
        "ptrtoint" => Opcode::PtrToInt,
        "inttoptr" => Opcode::IntToPtr,
        _ => unreachable!(),
    }
}

fn int_predicate_from_str(s: &str) -> IntPredicate {
    match s {
        "eq" => IntPredicate::Eq,
        "ne" => IntPredicate::Ne,
        "slt" => IntPredicate::SLt,
        "sle" => IntPredicate::SLe,
        "sgt" => IntPredicate::SGt,
        "sge" => IntPredicate::SGe,
        "ult" => IntPredicate::ULt,
        "ule" => IntPredicate::ULe,
        "ugt" => IntPredicate::UGt,
        "uge" => IntPredicate::UGe,
        _ => IntPredicate::Eq,
    }
}

fn float_predicate_from_str(s: &str) -> FloatPredicate {
    match s {
        "oeq" => FloatPredicate::OEq,
        "one" => FloatPredicate::ONe,
        "olt" => FloatPredicate::OLt,
        "ole" => FloatPredicate::OLe,
        "ogt" => FloatPredicate::OGt,
        "oge" => FloatPredicate::OGe,
        _ => FloatPredicate::OEq,
    }
}

fn terminator_targets(inst: &Instruction) -> Vec<BlockId> {
    match &inst.opcode {
        Opcode::Goto => inst.operands.iter().filter_map(block_of).collect(),
        Opcode::Branch => inst.operands.iter().skip(1).filter_map(block_of).collect(),
        _ => Vec::new(),
    }
}

fn block_of(v: &ValueRef) -> Option<BlockId> {
    match v {
        ValueRef::Block(_, b) => Some(*b),
        _ => None,
    }
}

/// Parses a complete textual IR module (§6). Returns the populated
/// [`Context`]/[`Module`] pair on success; on any diagnosed error returns
/// the [`DiagnosticEngine`] instead and emits no partial IR (§7 "Frontend
/// issues": "the core observes only whether the handler has errors and
/// refuses to proceed if so").
pub fn parse_module(src: &str, file_name: &str) -> Result<(Context, Module), DiagnosticEngine> {
    let mut source_manager = crate::common::source::SourceManager::new();
    let file_id = source_manager.add_file(file_name.to_string(), src.to_string());
    let (toks, lex_errors) = lex(src, file_id);
    let mut parser = Parser {
        toks,
        pos: 0,
        src,
        diags: DiagnosticEngine::new(),
        cx: Context::new(),
        module: Module::new(file_name),
        named_structs: FxHashMap::default(),
    };
    for (span, c) in lex_errors {
        parser.diags.emit(Diagnostic::error(ParseError::Lexical(c).to_string(), span));
    }
    parser.parse_module();
    if parser.diags.has_errors() {
        Err(parser.diags)
    } else {
        Ok((parser.cx, parser.module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer::print_module;

    fn roundtrip(src: &str) -> String {
        let (cx, module) = parse_module(src, "test.scir").expect("parse must succeed");
        print_module(&module, &cx)
    }

    #[test]
    fn parses_a_trivial_function() {
        let src = "func i32 @id(i32 %0) {\nentry:\n  return i32 %0\n}\n";
        let printed = roundtrip(src);
        assert!(printed.contains("func i32 @id"));
        assert!(printed.contains("return i32 %0"));
    }

    #[test]
    fn printing_then_parsing_is_idempotent() {
        let (mut cx, mut module) = (Context::new(), Module::new("m"));
        let i32t = cx.int_type(32);
        let func = module.declare_function(
            "add",
            i32t,
            vec![
                Param { ty: i32t, name: "a".into(), attribute: None },
                Param { ty: i32t, name: "b".into(), attribute: None },
            ],
            false,
        );
        let entry = module.function_mut(func).push_block("entry");
        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        let sum = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Add,
                operands: smallvec::smallvec![ValueRef::Param(func, 0), ValueRef::Param(func, 1)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Return,
                operands: smallvec::smallvec![ValueRef::Inst(func, sum)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let first = print_module(&module, &cx);
        let second = roundtrip(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn reports_unknown_opcode() {
        let src = "func void @f() {\nentry:\n  bogus void\n}\n";
        let result = parse_module(src, "test.scir");
        assert!(result.is_err());
    }

    #[test]
    fn reports_duplicate_global() {
        let src = "@g = global i32 i32 1\n@g = global i32 i32 2\n";
        let result = parse_module(src, "test.scir");
        assert!(result.is_err());
    }
}
