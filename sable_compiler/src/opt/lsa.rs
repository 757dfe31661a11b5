//! Load/store analysis: heap locations and the alias oracle.
//!
//! Collects one location per resolved memory access and answers may-alias
//! queries. Consumed by load/store elimination and by the instruction
//! scheduler's memory-dependency analysis. A location that was never
//! collected answers conservatively.

use super::{AnalysisCell, Pass};
use crate::ir::graph::Graph;
use crate::ir::node::{InstId, InstKind};
use rustc_hash::FxHashMap;

/// Result of an alias query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    /// Definitely the same location.
    MustAlias,
    /// Possibly the same location.
    MayAlias,
    /// Definitely different locations.
    NoAlias,
}

impl AliasResult {
    pub fn may_alias(self) -> bool {
        !matches!(self, AliasResult::NoAlias)
    }
}

/// Offset part of a heap location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offset {
    Field { offset: u32, is_static: bool },
    ArrayConst(i64),
    ArrayVar(InstId),
}

/// One tracked heap location: canonical base plus offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLocation {
    base: InstId,
    /// The base is a fresh allocation, so a different allocation can be
    /// proven disjoint.
    base_is_allocation: bool,
    offset: Offset,
}

/// All heap locations of one graph.
#[derive(Debug, Default, Clone)]
pub struct HeapLocations {
    locations: Vec<HeapLocation>,
    by_inst: FxHashMap<InstId, usize>,
}

impl HeapLocations {
    pub const NOT_FOUND: usize = usize::MAX;

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Location index for a collected memory access.
    pub fn location_of(&self, inst: InstId) -> usize {
        self.by_inst.get(&inst).copied().unwrap_or(Self::NOT_FOUND)
    }

    pub fn may_alias(&self, a: usize, b: usize) -> bool {
        if a == Self::NOT_FOUND || b == Self::NOT_FOUND {
            return true;
        }
        self.alias(a, b).may_alias()
    }

    pub fn alias(&self, a: usize, b: usize) -> AliasResult {
        if a == b {
            return AliasResult::MustAlias;
        }
        let (la, lb) = (self.locations[a], self.locations[b]);
        match (la.offset, lb.offset) {
            // Heap accesses of different kinds never alias.
            (Offset::Field { .. }, Offset::ArrayConst(_) | Offset::ArrayVar(_))
            | (Offset::ArrayConst(_) | Offset::ArrayVar(_), Offset::Field { .. }) => {
                AliasResult::NoAlias
            }
            (
                Offset::Field { offset: oa, is_static: sa },
                Offset::Field { offset: ob, is_static: sb },
            ) => {
                if sa != sb {
                    return AliasResult::NoAlias;
                }
                if oa != ob {
                    return AliasResult::NoAlias;
                }
                Self::base_alias(la, lb)
            }
            (Offset::ArrayConst(ia), Offset::ArrayConst(ib)) => {
                if Self::bases_provably_distinct(la, lb) {
                    return AliasResult::NoAlias;
                }
                if la.base == lb.base {
                    if ia == ib {
                        AliasResult::MustAlias
                    } else {
                        AliasResult::NoAlias
                    }
                } else {
                    AliasResult::MayAlias
                }
            }
            _ => {
                // At least one variable index.
                if Self::bases_provably_distinct(la, lb) {
                    AliasResult::NoAlias
                } else {
                    AliasResult::MayAlias
                }
            }
        }
    }

    fn base_alias(a: HeapLocation, b: HeapLocation) -> AliasResult {
        if a.base == b.base {
            return AliasResult::MustAlias;
        }
        if Self::bases_provably_distinct(a, b) {
            AliasResult::NoAlias
        } else {
            AliasResult::MayAlias
        }
    }

    /// Two different fresh allocations can never be the same object.
    fn bases_provably_distinct(a: HeapLocation, b: HeapLocation) -> bool {
        a.base != b.base && a.base_is_allocation && b.base_is_allocation
    }
}

pub struct LoadStoreAnalysis {
    result: AnalysisCell<HeapLocations>,
}

impl LoadStoreAnalysis {
    pub const NAME: &'static str = "load_store_analysis";

    pub fn new(result: AnalysisCell<HeapLocations>) -> Self {
        LoadStoreAnalysis { result }
    }

    /// Peel null checks to the original reference.
    fn canonical_base(graph: &Graph, mut base: InstId) -> InstId {
        while matches!(graph.inst(base).kind, InstKind::NullCheck) {
            base = graph.inst(base).inputs[0];
        }
        base
    }

    /// Peel the bounds check to the index value, constant-folding it.
    fn index_offset(graph: &Graph, index: InstId) -> Offset {
        let mut id = index;
        if matches!(graph.inst(id).kind, InstKind::BoundsCheck) {
            id = graph.inst(id).inputs[0];
        }
        match graph.inst(id).kind {
            InstKind::IntConst(v) => Offset::ArrayConst(v),
            _ => Offset::ArrayVar(id),
        }
    }

    fn is_allocation(graph: &Graph, base: InstId) -> bool {
        base.is_valid()
            && matches!(
                graph.inst(base).kind,
                InstKind::NewInstance { .. } | InstKind::NewArray { .. }
            )
    }

    pub fn compute(graph: &Graph) -> HeapLocations {
        let mut result = HeapLocations::default();
        for (id, inst) in graph.iter_insts() {
            let location = match inst.kind {
                InstKind::FieldGet(f) | InstKind::FieldSet(f) => {
                    let Some(offset) = f.offset else {
                        continue;
                    };
                    let base = if f.is_static {
                        InstId::INVALID
                    } else {
                        Self::canonical_base(graph, inst.inputs[0])
                    };
                    HeapLocation {
                        base,
                        base_is_allocation: Self::is_allocation(graph, base),
                        offset: Offset::Field { offset, is_static: f.is_static },
                    }
                }
                InstKind::ArrayGet | InstKind::ArraySet => {
                    let base = Self::canonical_base(graph, inst.inputs[0]);
                    HeapLocation {
                        base,
                        base_is_allocation: Self::is_allocation(graph, base),
                        offset: Self::index_offset(graph, inst.inputs[1]),
                    }
                }
                _ => continue,
            };
            let index = result
                .locations
                .iter()
                .position(|l| *l == location)
                .unwrap_or_else(|| {
                    result.locations.push(location);
                    result.locations.len() - 1
                });
            result.by_inst.insert(id, index);
        }
        result
    }
}

impl Pass for LoadStoreAnalysis {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&mut self, graph: &mut Graph) -> bool {
        self.result.publish(Self::compute(graph));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{FieldAccess, ValueType};
    use sable_bytecode::{MethodRef, SourceFileId};
    use smallvec::smallvec;

    fn field(offset: u32) -> FieldAccess {
        FieldAccess { field_index: 0, offset: Some(offset), is_volatile: false, is_static: false }
    }

    #[test]
    fn test_same_field_same_base_must_alias() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let l1 = g.add_inst(InstKind::FieldGet(field(8)), smallvec![obj], ValueType::Int, 0);
        let l2 = g.add_inst(InstKind::FieldGet(field(8)), smallvec![obj], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [obj, l1, l2, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let locs = LoadStoreAnalysis::compute(&g);
        let (a, b_) = (locs.location_of(l1), locs.location_of(l2));
        assert_eq!(locs.alias(a, b_), AliasResult::MustAlias);
    }

    #[test]
    fn test_different_fields_never_alias() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 2);
        let b = g.add_block();
        g.set_entry(b);
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let l1 = g.add_inst(InstKind::FieldGet(field(8)), smallvec![obj], ValueType::Int, 0);
        let l2 = g.add_inst(InstKind::FieldGet(field(16)), smallvec![obj], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [obj, l1, l2, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let locs = LoadStoreAnalysis::compute(&g);
        assert_eq!(
            locs.alias(locs.location_of(l1), locs.location_of(l2)),
            AliasResult::NoAlias
        );
    }

    #[test]
    fn test_array_vs_field_never_alias() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b = g.add_block();
        g.set_entry(b);
        let obj = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let arr = g.add_inst(InstKind::Param(1), smallvec![], ValueType::Ref, 0);
        let idx = g.add_inst(InstKind::IntConst(0), smallvec![], ValueType::Int, 0);
        let fl = g.add_inst(InstKind::FieldGet(field(8)), smallvec![obj], ValueType::Int, 0);
        let al = g.add_inst(InstKind::ArrayGet, smallvec![arr, idx], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [obj, arr, idx, fl, al, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let locs = LoadStoreAnalysis::compute(&g);
        assert_eq!(
            locs.alias(locs.location_of(fl), locs.location_of(al)),
            AliasResult::NoAlias
        );
    }

    #[test]
    fn test_same_array_distinct_constant_indices() {
        let mut g = Graph::new(MethodRef::new(SourceFileId(0), 0), 4);
        let b = g.add_block();
        g.set_entry(b);
        let arr = g.add_inst(InstKind::Param(0), smallvec![], ValueType::Ref, 0);
        let i0 = g.add_inst(InstKind::IntConst(0), smallvec![], ValueType::Int, 0);
        let i1 = g.add_inst(InstKind::IntConst(1), smallvec![], ValueType::Int, 0);
        let l0 = g.add_inst(InstKind::ArrayGet, smallvec![arr, i0], ValueType::Int, 0);
        let l1 = g.add_inst(InstKind::ArrayGet, smallvec![arr, i1], ValueType::Int, 0);
        let ret = g.add_inst(InstKind::ReturnVoid, smallvec![], ValueType::Void, 0);
        for i in [arr, i0, i1, l0, l1, ret] {
            g.append(b, i);
        }
        g.build_dominator_tree();

        let locs = LoadStoreAnalysis::compute(&g);
        assert_eq!(
            locs.alias(locs.location_of(l0), locs.location_of(l1)),
            AliasResult::NoAlias
        );
        // Unknown instruction answers conservatively.
        assert!(locs.may_alias(locs.location_of(ret), locs.location_of(l0)));
    }
}
