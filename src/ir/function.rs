//! Function bodies: block and instruction slot maps plus the def-use index.
//!
//! Blocks and instructions live in growable vectors addressed by `BlockId`/`InstId`.
//! Removing one leaves a tombstone so handles held elsewhere never alias a new entity.
//! The def-use index maps each instruction result to the instructions reading it and is
//! updated by every operation that edits an operand list; predecessor lists are updated
//! whenever a terminator is added, removed or retargeted.

use std::ops::Index;

use hashbrown::HashMap;

use super::instruction::{InstKind, Instruction};
use super::types::Type;
use super::value::{BlockId, InstId, Value};
use crate::core::{CompileError, CompileResult};

/// Signature of a function or extern declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPrototype {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Type>,
    pub variadic: bool,
}

impl FunctionPrototype {
    pub fn new(name: impl Into<String>, ret: Type, params: Vec<Type>) -> Self {
        Self { name: name.into(), ret, params, variadic: false }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    /// Instructions in execution order, phis first, terminator last.
    pub insts: Vec<InstId>,
    /// Predecessors in the order their edges were created.
    pub preds: Vec<BlockId>,
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    proto: FunctionPrototype,
    blocks: Vec<Option<BasicBlock>>,
    insts: Vec<Option<Instruction>>,
    /// Block order used for printing and code layout.
    layout: Vec<BlockId>,
    entry: BlockId,
    /// Users of each instruction result, one entry per operand occurrence.
    users: HashMap<InstId, Vec<InstId>>,
}

impl FunctionData {
    /// New function holding an empty entry block.
    pub fn new(proto: FunctionPrototype) -> Self {
        let mut func = Self {
            proto,
            blocks: Vec::new(),
            insts: Vec::new(),
            layout: Vec::new(),
            entry: BlockId(0),
            users: HashMap::new(),
        };
        func.entry = func.create_block();
        func
    }

    pub fn prototype(&self) -> &FunctionPrototype {
        &self.proto
    }

    pub fn name(&self) -> &str {
        &self.proto.name
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Argument values in parameter order.
    pub fn args(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.proto.params.len() as u32).map(Value::Argument)
    }

    /// Live blocks in layout order.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn inst_mut(&mut self, id: InstId) -> Option<&mut Instruction> {
        self.insts.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Number of instruction slots, tombstones included.
    pub fn inst_capacity(&self) -> usize {
        self.insts.len()
    }

    /// Number of live instructions attached to blocks.
    pub fn inst_count(&self) -> usize {
        self.layout.iter().map(|&b| self[b].insts.len()).sum()
    }

    pub fn preds(&self, id: BlockId) -> &[BlockId] {
        self.block(id).map(|b| b.preds.as_slice()).unwrap_or(&[])
    }

    pub fn terminator(&self, id: BlockId) -> Option<InstId> {
        let last = *self.block(id)?.insts.last()?;
        self[last].is_terminator().then_some(last)
    }

    pub fn succs(&self, id: BlockId) -> Vec<BlockId> {
        self.terminator(id).map(|t| self[t].successors()).unwrap_or_default()
    }

    /// Phi instructions at the head of `id`.
    pub fn phis(&self, id: BlockId) -> Vec<InstId> {
        self[id].insts.iter().copied().take_while(|&i| self[i].is_phi()).collect()
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock::default()));
        self.layout.push(id);
        id
    }

    /// Append an instruction to the end of `block`.
    pub fn append_inst(&mut self, block: BlockId, kind: InstKind, ty: Type, operands: Vec<Value>) -> InstId {
        let index = self[block].insts.len();
        self.insert_at(block, index, kind, ty, operands)
    }

    /// Insert an instruction right before `before`, in the same block.
    pub fn insert_before(&mut self, before: InstId, kind: InstKind, ty: Type, operands: Vec<Value>) -> InstId {
        let block = self[before].block;
        let index = self.position_in_block(before).unwrap_or(0);
        self.insert_at(block, index, kind, ty, operands)
    }

    /// Insert an instruction at `index` of `block`.
    pub fn insert_at(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        ty: Type,
        operands: Vec<Value>,
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        for op in &operands {
            if let Some(def) = op.as_local() {
                self.users.entry(def).or_default().push(id);
            }
        }
        let inst = Instruction { kind, ty, operands, block };
        let succs = if inst.is_terminator() { inst.successors() } else { Vec::new() };
        self.insts.push(Some(inst));
        if let Some(b) = self.blocks[block.index()].as_mut() {
            b.insts.insert(index, id);
        }
        for s in succs {
            self.add_pred(s, block);
        }
        id
    }

    pub fn position_in_block(&self, id: InstId) -> Option<usize> {
        let block = self.inst(id)?.block;
        self.block(block)?.insts.iter().position(|&i| i == id)
    }

    /// Users of the result of `id`, each listed once.
    pub fn users(&self, id: InstId) -> Vec<InstId> {
        let mut out: Vec<InstId> = Vec::new();
        if let Some(list) = self.users.get(&id) {
            for &u in list {
                if !out.contains(&u) {
                    out.push(u);
                }
            }
        }
        out
    }

    pub fn has_users(&self, id: InstId) -> bool {
        self.users.get(&id).is_some_and(|l| !l.is_empty())
    }

    /// Replace operand `index` of `inst`, keeping the def-use index exact.
    pub fn set_operand(&mut self, inst: InstId, index: usize, value: Value) {
        let Some(slot) = self.inst_mut(inst).and_then(|i| i.operands.get_mut(index)) else {
            return;
        };
        let old = std::mem::replace(slot, value.clone());
        if let Some(def) = old.as_local() {
            self.drop_use(def, inst);
        }
        if let Some(def) = value.as_local() {
            self.users.entry(def).or_default().push(inst);
        }
    }

    /// Turn `id` into a different non-terminator instruction with the same result type,
    /// keeping its identity so existing readers see the new definition.
    pub(crate) fn rewrite_inst(&mut self, id: InstId, kind: InstKind, operands: Vec<Value>) {
        let Some(inst) = self.inst_mut(id) else {
            return;
        };
        inst.kind = kind;
        let old = std::mem::replace(&mut inst.operands, operands.clone());
        for op in old {
            if let Some(def) = op.as_local() {
                self.drop_use(def, id);
            }
        }
        for op in operands {
            if let Some(def) = op.as_local() {
                self.users.entry(def).or_default().push(id);
            }
        }
    }

    /// Append the operand flowing into phi `phi` from `pred`.
    pub fn add_phi_incoming(&mut self, phi: InstId, value: Value, pred: BlockId) -> CompileResult<()> {
        let name = self.proto.name.clone();
        let inst = self
            .inst_mut(phi)
            .ok_or_else(|| CompileError::invalid_ir(format!("{phi} does not exist in @{name}")))?;
        let InstKind::Phi { incoming } = &mut inst.kind else {
            return Err(CompileError::invalid_ir(format!("{phi} in @{name} is not a phi")));
        };
        incoming.push(pred);
        inst.operands.push(value.clone());
        if let Some(def) = value.as_local() {
            self.users.entry(def).or_default().push(phi);
        }
        Ok(())
    }

    /// Rewrite every read of `old` to read `new` instead.
    pub fn replace_all_uses(&mut self, old: InstId, new: Value) {
        for user in self.users(old) {
            let count = self[user].operands.len();
            for index in 0..count {
                if self[user].operands[index] == Value::Local(old) {
                    self.set_operand(user, index, new.clone());
                }
            }
        }
    }

    /// Delete an instruction whose result is unused.
    pub fn remove_inst(&mut self, id: InstId) -> CompileResult<()> {
        if self.has_users(id) {
            return Err(CompileError::invalid_ir(format!(
                "cannot remove {id} in @{}: result still has users",
                self.proto.name
            )));
        }
        self.detach_inst(id);
        self.insts[id.index()] = None;
        Ok(())
    }

    /// Take an instruction out of its block and drop its operand uses, keeping the
    /// record so its identity and type stay queryable.
    pub(crate) fn detach_inst(&mut self, id: InstId) {
        let Some(inst) = self.inst_mut(id) else {
            return;
        };
        let block = inst.block;
        let operands = std::mem::take(&mut inst.operands);
        let succs = if inst.is_terminator() { inst.successors() } else { Vec::new() };
        for op in operands {
            if let Some(def) = op.as_local() {
                self.drop_use(def, id);
            }
        }
        if let Some(b) = self.blocks[block.index()].as_mut() {
            b.insts.retain(|&i| i != id);
        }
        for s in succs {
            self.remove_pred(s, block);
        }
    }

    /// Remove a block and everything in it. Phis of its successors lose the
    /// corresponding operand.
    pub fn remove_block(&mut self, id: BlockId) -> CompileResult<()> {
        if id == self.entry {
            return Err(CompileError::invalid_ir("cannot remove the entry block"));
        }
        for succ in self.succs(id) {
            self.remove_phi_incoming(succ, id);
        }
        let insts = self[id].insts.clone();
        for &inst in insts.iter().rev() {
            self.detach_inst(inst);
        }
        for &inst in &insts {
            // Results may still be read by other unreachable blocks being removed.
            self.users.remove(&inst);
            self.insts[inst.index()] = None;
        }
        self.blocks[id.index()] = None;
        self.layout.retain(|&b| b != id);
        Ok(())
    }

    /// Insert a block on the edge `from -> to` and return it. The new block holds only
    /// a branch to `to`; it takes over `from`'s position in `to`'s predecessor list
    /// and in its phis.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> CompileResult<BlockId> {
        let term = self.terminator(from).ok_or_else(|| {
            CompileError::invalid_ir(format!("block {from} of @{} has no terminator", self.proto.name))
        })?;
        let mid = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock { insts: Vec::new(), preds: vec![from] }));
        let at = self.layout.iter().position(|&b| b == from).map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(at, mid);

        let branch = InstId(self.insts.len() as u32);
        self.insts.push(Some(Instruction {
            kind: InstKind::Branch { target: to },
            ty: Type::Void,
            operands: Vec::new(),
            block: mid,
        }));
        if let Some(b) = self.blocks[mid.index()].as_mut() {
            b.insts.push(branch);
        }
        if let Some(t) = self.inst_mut(term) {
            t.replace_successor(to, mid);
        }
        if let Some(b) = self.blocks[to.index()].as_mut() {
            for p in b.preds.iter_mut() {
                if *p == from {
                    *p = mid;
                }
            }
        }
        for phi in self.phis(to) {
            if let Some(InstKind::Phi { incoming }) = self.inst_mut(phi).map(|i| &mut i.kind) {
                for b in incoming.iter_mut() {
                    if *b == from {
                        *b = mid;
                    }
                }
            }
        }
        Ok(mid)
    }

    /// Drop the operand flowing in from `pred` from every phi of `block`.
    fn remove_phi_incoming(&mut self, block: BlockId, pred: BlockId) {
        for phi in self.phis(block) {
            let Some(inst) = self.inst_mut(phi) else { continue };
            let InstKind::Phi { incoming } = &mut inst.kind else { continue };
            let Some(pos) = incoming.iter().position(|&b| b == pred) else { continue };
            incoming.remove(pos);
            let op = inst.operands.remove(pos);
            if let Some(def) = op.as_local() {
                self.drop_use(def, phi);
            }
        }
    }

    /// Type of an operand.
    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Constant(c) => c.ty.clone(),
            Value::Local(id) => self.inst(*id).map(|i| i.ty.clone()).unwrap_or(Type::Undef),
            Value::Argument(i) => self.proto.params.get(*i as usize).cloned().unwrap_or(Type::Undef),
            Value::Global(_) => Type::Ptr,
            Value::Undef => Type::Undef,
        }
    }

    /// All instructions attached to blocks, in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = InstId> + '_ {
        self.layout.iter().flat_map(move |&b| self[b].insts.iter().copied())
    }

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(b) = self.blocks.get_mut(block.index()).and_then(Option::as_mut) {
            if !b.preds.contains(&pred) {
                b.preds.push(pred);
            }
        }
    }

    fn remove_pred(&mut self, block: BlockId, pred: BlockId) {
        if let Some(b) = self.blocks.get_mut(block.index()).and_then(Option::as_mut) {
            b.preds.retain(|&p| p != pred);
        }
    }

    fn drop_use(&mut self, def: InstId, user: InstId) {
        if let Some(list) = self.users.get_mut(&def) {
            if let Some(pos) = list.iter().position(|&u| u == user) {
                list.swap_remove(pos);
            }
        }
    }
}

impl Index<BlockId> for FunctionData {
    type Output = BasicBlock;

    fn index(&self, id: BlockId) -> &BasicBlock {
        match self.block(id) {
            Some(b) => b,
            None => panic!("block {id} was removed from @{}", self.proto.name),
        }
    }
}

impl Index<InstId> for FunctionData {
    type Output = Instruction;

    fn index(&self, id: InstId) -> &Instruction {
        match self.inst(id) {
            Some(i) => i,
            None => panic!("instruction {id} was removed from @{}", self.proto.name),
        }
    }
}
