//! Building the reference positions of a block.

use log::{debug, trace};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{
    interval::IntervalOrigin,
    Interval,
    IntervalId,
    LsraConfig,
    LsraError,
    RefKind,
    RefPosition,
    RefPositionId,
};
use crate::{
    ir::{Block, Lir, Node, Opcode, Ty},
    target::{IntrinsicId, RegKind, RegMask, TargetDesc},
};

/// The intervals and reference positions of a block.
#[derive(Debug, Default)]
pub struct LsraBuild {
    pub intervals: Vec<Interval>,
    pub ref_positions: Vec<RefPosition>,
    /// The next member of a consecutive group.
    pub next_consecutive: FxHashMap<RefPositionId, RefPositionId>,
    /// The references of each non-contained node, in order.
    pub node_refs: FxHashMap<Node, Vec<RefPositionId>>,
    /// The even location of each non-contained node.
    pub node_loc: FxHashMap<Node, u32>,
    /// The non-contained nodes, in program order.
    pub order: Vec<Node>,
    /// The intervals of the register values each node produces.
    pub node_intervals: FxHashMap<Node, SmallVec<[IntervalId; 2]>>,
}

impl LsraBuild {
    pub fn interval(&self, id: IntervalId) -> &Interval { &self.intervals[id.index()] }

    pub fn ref_position(&self, id: RefPositionId) -> &RefPosition {
        &self.ref_positions[id.index()]
    }

    /// The members of the group starting at `first`, in order.
    pub fn group(&self, first: RefPositionId) -> Vec<RefPositionId> {
        let mut members = vec![first];
        let mut curr = first;
        while let Some(next) = self.next_consecutive.get(&curr) {
            members.push(*next);
            curr = *next;
        }
        members
    }

    /// The references of the node.
    pub fn refs_of(&self, node: Node) -> &[RefPositionId] {
        self.node_refs.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first reference of the interval after `location`.
    pub fn next_ref_after(&self, interval: IntervalId, location: u32) -> Option<&RefPosition> {
        self.interval(interval)
            .refs
            .iter()
            .map(|rp| self.ref_position(*rp))
            .find(|rp| rp.location > location)
    }

    /// The highest location used.
    pub fn max_location(&self) -> u32 { self.order.len() as u32 * 2 }
}

/// A register read by a node: the interval and the top-level operand it is
/// read for.
#[derive(Clone, Copy)]
struct UseSite {
    interval: IntervalId,
    operand: usize,
}

pub struct RefPositionBuilder<'a> {
    lir: &'a Lir,
    block: Block,
    target: &'a dyn TargetDesc,
    config: &'a LsraConfig,
    build: LsraBuild,
    locals: FxHashMap<u32, IntervalId>,
    /// Parameters seen so far, per register kind.
    params: [usize; 3],
}

impl<'a> RefPositionBuilder<'a> {
    pub fn new(
        lir: &'a Lir,
        block: Block,
        target: &'a dyn TargetDesc,
        config: &'a LsraConfig,
    ) -> Self {
        Self {
            lir,
            block,
            target,
            config,
            build: LsraBuild::default(),
            locals: FxHashMap::default(),
            params: [0; 3],
        }
    }

    pub fn build(mut self) -> Result<LsraBuild, LsraError> {
        let nodes = self
            .block
            .nodes(self.lir)
            .into_iter()
            .filter(|node| !node.is_contained(self.lir))
            .collect::<Vec<_>>();

        for (i, node) in nodes.into_iter().enumerate() {
            let location = 2 * i as u32;
            self.build.order.push(node);
            self.build.node_loc.insert(node, location);
            self.build_node(node, location)?;
        }

        self.mark_last_uses();
        self.prefer_across_kills();

        debug!(
            "built {} ref positions for {} intervals over {} nodes",
            self.build.ref_positions.len(),
            self.build.intervals.len(),
            self.build.order.len()
        );
        Ok(self.build)
    }

    fn allocatable(&self, kind: RegKind) -> RegMask { self.config.allocatable(self.target, kind) }

    fn new_interval(
        &mut self,
        origin: IntervalOrigin,
        kind: RegKind,
        ty: Ty,
        constant: Option<u64>,
    ) -> IntervalId {
        let id = IntervalId(self.build.intervals.len() as u32);
        self.build.intervals.push(Interval {
            id,
            origin,
            kind,
            ty,
            constant,
            refs: Vec::new(),
            preferences: RegMask::EMPTY,
            related: None,
        });
        id
    }

    fn new_ref(
        &mut self,
        node: Node,
        location: u32,
        kind: RefKind,
        interval: Option<IntervalId>,
        reg_kind: RegKind,
        candidates: RegMask,
    ) -> RefPositionId {
        let id = RefPositionId(self.build.ref_positions.len() as u32);
        self.build.ref_positions.push(RefPosition {
            id,
            location,
            kind,
            interval,
            reg_kind,
            candidates,
            fixed: false,
            delay_free: false,
            reg_optional: false,
            last_use: false,
            needs_consecutive: false,
            reg_count: 0,
            multi_reg_idx: 0,
            operand: None,
            node,
        });
        if let Some(interval) = interval {
            self.build.intervals[interval.index()].refs.push(id);
        }
        self.build.node_refs.entry(node).or_default().push(id);
        id
    }

    fn ref_mut(&mut self, id: RefPositionId) -> &mut RefPosition {
        &mut self.build.ref_positions[id.index()]
    }

    fn fix(&mut self, id: RefPositionId, num: u8) {
        let rp = self.ref_mut(id);
        rp.candidates = RegMask::single(num);
        rp.fixed = true;
    }

    fn reg_kind(&self, node: Node, ty: Ty) -> Result<RegKind, LsraError> {
        self.target.reg_kind(ty).ok_or(LsraError::NoRegKind {
            node,
            ty,
            target: self.target.name(),
        })
    }

    /// The interval of register value `idx` of `node`.
    fn node_interval(&self, node: Node, idx: u8) -> Result<IntervalId, LsraError> {
        self.build
            .node_intervals
            .get(&node)
            .and_then(|intervals| intervals.get(idx as usize))
            .copied()
            .ok_or(LsraError::Undefined { node })
    }

    fn local_interval(&mut self, local: u32, node: Node, ty: Ty) -> Result<IntervalId, LsraError> {
        if let Some(interval) = self.locals.get(&local) {
            return Ok(*interval);
        }
        let kind = self.reg_kind(node, ty)?;
        let interval = self.new_interval(IntervalOrigin::Local(local), kind, ty, None);
        self.locals.insert(local, interval);
        Ok(interval)
    }

    /// Collect the registers read for operand `idx` of a node.
    fn collect_uses(
        &mut self,
        operand: Node,
        idx: usize,
        sites: &mut Vec<UseSite>,
    ) -> Result<(), LsraError> {
        let lir = self.lir;
        if !operand.ty(lir).is_reg_value() {
            // flags live in the flags register, multi values are read by
            // projections
            return Ok(());
        }

        if !operand.is_contained(lir) {
            let interval = self.node_interval(operand, 0)?;
            sites.push(UseSite {
                interval,
                operand: idx,
            });
            return Ok(());
        }

        match operand.op(lir) {
            Opcode::LclVar(local) => {
                let interval = self.local_interval(local, operand, operand.ty(lir))?;
                sites.push(UseSite {
                    interval,
                    operand: idx,
                });
            }
            Opcode::Proj(k) => {
                let interval = self.node_interval(operand.operand(lir, 0), k)?;
                sites.push(UseSite {
                    interval,
                    operand: idx,
                });
            }
            _ => {
                for child in operand.operands(lir) {
                    self.collect_uses(*child, idx, sites)?;
                }
            }
        }
        Ok(())
    }

    fn build_node(&mut self, node: Node, location: u32) -> Result<(), LsraError> {
        let lir = self.lir;
        let target = self.target;
        let op = node.op(lir);
        let info = match op {
            Opcode::Intrinsic(id) => Some(id.info()),
            _ => None,
        };
        let llsc = target.llsc_atomics();

        // +-----------------+
        // |      uses       |
        // +-----------------+

        let mut sites = Vec::new();
        match op {
            Opcode::LclVar(local) => {
                let interval = self.local_interval(local, node, node.ty(lir))?;
                sites.push(UseSite {
                    interval,
                    operand: 0,
                });
            }
            Opcode::Proj(k) => {
                let interval = self.node_interval(node.operand(lir, 0), k)?;
                sites.push(UseSite {
                    interval,
                    operand: 0,
                });
            }
            _ => {
                for (idx, operand) in node.operands(lir).iter().enumerate() {
                    self.collect_uses(*operand, idx, &mut sites)?;
                }
            }
        }

        let rmw = target.is_rmw(&op);
        let mut args = [0usize; 3];
        let mut uses = Vec::with_capacity(sites.len());
        for site in sites.iter() {
            let kind = self.build.intervals[site.interval.index()].kind;
            let candidates = self.allocatable(kind);
            let rp = self.new_ref(node, location, RefKind::Use, Some(site.interval), kind, candidates);
            self.ref_mut(rp).operand = Some(site.operand);

            let fixed = match op {
                Opcode::Call { .. } => {
                    let n = &mut args[kind.index()];
                    let reg = target.arg_regs(kind).get(*n).copied();
                    *n += 1;
                    reg
                }
                Opcode::Return => target.ret_regs(kind).first().copied(),
                Opcode::Shl | Opcode::Shr | Opcode::Sar if site.operand == 1 => {
                    target.shift_count_reg().map(|reg| reg.num())
                }
                Opcode::Intrinsic(IntrinsicId::CompareExchange) if !llsc && site.operand == 1 => {
                    target.cmpxchg_reg().map(|reg| reg.num())
                }
                _ => None,
            };
            if let Some(num) = fixed {
                self.fix(rp, num);
            } else if node.is_reg_optional(lir, site.operand) {
                self.ref_mut(rp).reg_optional = true;
            }

            let delay_free = (rmw && site.operand >= 1)
                || info.map_or(false, |info| {
                    info.tied.map_or(false, |tied| site.operand != tied)
                        || (info.retry_loop && llsc)
                })
                || (op == Opcode::Intrinsic(IntrinsicId::AtomicAdd) && !llsc && site.operand == 0);
            self.ref_mut(rp).delay_free = delay_free;

            uses.push(rp);
        }

        if let Some((first, count)) = info.and_then(|info| info.consecutive) {
            let members = sites
                .iter()
                .zip(uses.iter())
                .filter(|(site, _)| (first..first + count as usize).contains(&site.operand))
                .map(|(_, rp)| *rp)
                .collect::<Vec<_>>();
            self.link_group(&members, count);
        }

        // +-----------------+
        // |  internal temps |
        // +-----------------+

        let temps = match info {
            Some(info) if info.retry_loop && !llsc => 0,
            Some(info) => info.internal_temps + u8::from(node.needs_imm_fallback(lir)),
            None => 0,
        };
        let mut temp_intervals = Vec::new();
        for _ in 0..temps {
            let kind = RegKind::General;
            let interval =
                self.new_interval(IntervalOrigin::Internal(node), kind, Ty::I64, None);
            let candidates = self.allocatable(kind);
            self.new_ref(node, location, RefKind::Def, Some(interval), kind, candidates);
            temp_intervals.push(interval);
        }

        // +-----------------+
        // |      kills      |
        // +-----------------+

        if matches!(op, Opcode::Call { .. }) {
            for kind in RegKind::ALL {
                let killed = target.caller_saved(kind);
                if !killed.is_empty() && target.reg_file_size(kind) > 0 {
                    self.new_ref(node, location + 1, RefKind::Kill, None, kind, killed);
                }
            }
        }

        // +-----------------+
        // |      defs       |
        // +-----------------+

        let related_operand = |operand: usize| {
            sites
                .iter()
                .find(|site| site.operand == operand)
                .map(|site| site.interval)
        };
        let related = if rmw {
            related_operand(0)
        } else if let Some(tied) = info.and_then(|info| info.tied) {
            related_operand(tied)
        } else if op == Opcode::Intrinsic(IntrinsicId::AtomicAdd) && !llsc {
            related_operand(1)
        } else if matches!(op, Opcode::StoreLclVar(_) | Opcode::LclVar(_) | Opcode::Proj(_)) {
            related_operand(0)
        } else {
            None
        };

        if let Opcode::StoreLclVar(local) = op {
            let value_ty = node.operand(lir, 0).ty(lir);
            let interval = self.local_interval(local, node, value_ty)?;
            let kind = self.build.intervals[interval.index()].kind;
            let candidates = self.allocatable(kind);
            self.new_ref(node, location + 1, RefKind::Def, Some(interval), kind, candidates);
            let data = &mut self.build.intervals[interval.index()];
            if data.related.is_none() && related != Some(interval) {
                data.related = related;
            }
        } else {
            let mut rets = [0usize; 3];
            let mut defs = Vec::new();
            for (idx, ty) in node.reg_tys(lir).iter().copied().enumerate() {
                let kind = self.reg_kind(node, ty)?;
                let constant = match op {
                    Opcode::IConst(value) => Some(value as u64),
                    Opcode::FConst(bits) => Some(bits),
                    _ => None,
                };
                let interval =
                    self.new_interval(IntervalOrigin::Node(node, idx as u8), kind, ty, constant);
                self.build.intervals[interval.index()].related = related;
                self.build
                    .node_intervals
                    .entry(node)
                    .or_default()
                    .push(interval);

                let candidates = self.allocatable(kind);
                let rp =
                    self.new_ref(node, location + 1, RefKind::Def, Some(interval), kind, candidates);
                self.ref_mut(rp).multi_reg_idx = idx as u8;

                let fixed = match op {
                    Opcode::Param(_) => {
                        let n = &mut self.params[kind.index()];
                        let reg = target.arg_regs(kind).get(*n).copied();
                        *n += 1;
                        reg
                    }
                    Opcode::Call { .. } => {
                        let n = &mut rets[kind.index()];
                        let reg = target.ret_regs(kind).get(*n).copied();
                        *n += 1;
                        reg
                    }
                    Opcode::Intrinsic(IntrinsicId::CompareExchange) if !llsc => {
                        target.cmpxchg_reg().map(|reg| reg.num())
                    }
                    _ => None,
                };
                if let Some(num) = fixed {
                    self.fix(rp, num);
                } else if let Some(mask) = node.reg_mask(lir) {
                    let rp = self.ref_mut(rp);
                    rp.candidates = mask;
                    rp.fixed = mask.is_single();
                }
                defs.push(rp);
            }

            if info.map_or(false, |info| info.consecutive_defs) && defs.len() > 1 {
                let count = defs.len() as u8;
                self.link_group(&defs, count);
            }
        }

        for interval in temp_intervals {
            let candidates = self.allocatable(RegKind::General);
            let rp = self.new_ref(
                node,
                location + 1,
                RefKind::Use,
                Some(interval),
                RegKind::General,
                candidates,
            );
            self.ref_mut(rp).last_use = true;
        }

        Ok(())
    }

    /// Chain the references of a consecutive group.
    fn link_group(&mut self, members: &[RefPositionId], count: u8) {
        if members.len() != count as usize || members.is_empty() {
            trace!("group of {} references formed from {} members", count, members.len());
            return;
        }
        for pair in members.windows(2) {
            self.build.next_consecutive.insert(pair[0], pair[1]);
        }
        let first = self.ref_mut(members[0]);
        first.needs_consecutive = true;
        first.reg_count = count;
    }

    /// Mark the uses after which the value of an interval is dead: the final
    /// one, and the last read before a local is defined again.
    ///
    /// A last use at a location where the same interval is also read
    /// delay-free keeps the register through the next location as well.
    fn mark_last_uses(&mut self) {
        for i in 0..self.build.intervals.len() {
            let refs = self.build.intervals[i].refs.clone();
            for (pos, rp) in refs.iter().enumerate() {
                let curr = &self.build.ref_positions[rp.index()];
                if !curr.is_use() {
                    continue;
                }
                let next = refs.get(pos + 1).map(|next| self.build.ref_positions[next.index()].kind);
                if !matches!(next, None | Some(RefKind::Def)) {
                    continue;
                }
                let location = curr.location;
                let delay_free = refs.iter().any(|other| {
                    let other = &self.build.ref_positions[other.index()];
                    other.location == location && other.delay_free
                });
                let curr = self.ref_mut(*rp);
                curr.last_use = true;
                curr.delay_free |= delay_free;
            }
        }
    }

    /// Intervals live across a kill prefer the registers it leaves alone.
    fn prefer_across_kills(&mut self) {
        let kills = self
            .build
            .ref_positions
            .iter()
            .filter(|rp| rp.is_kill())
            .map(|rp| (rp.location, rp.reg_kind, rp.candidates))
            .collect::<Vec<_>>();

        for (location, kind, killed) in kills {
            let preferred = self.allocatable(kind) & !killed;
            if preferred.is_empty() {
                continue;
            }
            for i in 0..self.build.intervals.len() {
                let interval = &self.build.intervals[i];
                if interval.kind != kind || interval.is_internal() {
                    continue;
                }
                let id = interval.id;
                let live_before = interval
                    .refs
                    .first()
                    .map_or(false, |rp| self.build.ref_positions[rp.index()].location < location);
                let read_after = self
                    .build
                    .next_ref_after(id, location)
                    .map_or(false, |rp| rp.is_use());
                if live_before && read_after {
                    trace!("{} lives across the kill at {}", id, location);
                    self.build.intervals[i].preferences = preferred;
                }
            }
        }
    }
}
