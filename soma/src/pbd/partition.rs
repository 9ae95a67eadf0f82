use ahash::{AHashMap, AHashSet};

use super::constraint::PbdConstraint;
use crate::Error;

/// A group of constraints guaranteed not to share any particle.
///
/// The invariant is what makes projecting a partition in parallel safe:
/// every constraint writes a disjoint set of position slots. It is
/// enforced here, at construction, so a violation is a hard error instead
/// of a silent data race during the solve.
#[derive(Debug)]
pub struct ConstraintPartition {
    constraints: Vec<PbdConstraint>,
}

impl ConstraintPartition {
    pub fn new(constraints: Vec<PbdConstraint>) -> Result<Self, Error> {
        let mut owner: AHashMap<usize, usize> = AHashMap::new();
        for (index, constraint) in constraints.iter().enumerate() {
            for &particle in constraint.particles() {
                if let Some(&first) = owner.get(&particle) {
                    return Err(Error::InvalidPartition {
                        first,
                        second: index,
                        particle,
                    });
                }
                owner.insert(particle, index);
            }
        }
        Ok(ConstraintPartition { constraints })
    }

    pub fn constraints(&self) -> &[PbdConstraint] {
        &self.constraints
    }

    pub(crate) fn constraints_mut(&mut self) -> &mut [PbdConstraint] {
        &mut self.constraints
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn into_constraints(self) -> Vec<PbdConstraint> {
        self.constraints
    }
}

/// Greedily groups constraints into conflict-free partitions.
///
/// First-fit coloring over the constraint interaction graph: each
/// constraint goes into the first partition whose particle set it does
/// not touch. Partitions that end up smaller than `min_partition_size`
/// are not worth a parallel dispatch and are returned in the serial
/// remainder instead.
pub fn partition_constraints(
    constraints: Vec<PbdConstraint>,
    min_partition_size: usize,
) -> (Vec<ConstraintPartition>, Vec<PbdConstraint>) {
    let mut groups: Vec<Vec<PbdConstraint>> = Vec::new();
    let mut occupancy: Vec<AHashSet<usize>> = Vec::new();

    for constraint in constraints {
        let slot = occupancy
            .iter()
            .position(|particles| constraint.particles().iter().all(|p| !particles.contains(p)));
        match slot {
            Some(g) => {
                occupancy[g].extend(constraint.particles().iter().copied());
                groups[g].push(constraint);
            }
            None => {
                occupancy.push(constraint.particles().iter().copied().collect());
                groups.push(vec![constraint]);
            }
        }
    }

    let mut partitions = Vec::new();
    let mut serial = Vec::new();
    for group in groups {
        if group.len() < min_partition_size {
            serial.extend(group);
        } else {
            let partition =
                ConstraintPartition::new(group).expect("greedy groups are conflict-free");
            partitions.push(partition);
        }
    }
    (partitions, serial)
}
