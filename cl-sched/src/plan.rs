use std::cmp::Reverse;
use std::fmt::{Display, Formatter};

use crate::graph::ValueId;
use crate::life::{Lifetime, LifetimeStat};

/// A value placed in memory: its lifetime together with the offset it is stored at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryDesc {
    pub value: ValueId,
    pub gen: i32,
    pub kill: i32,
    pub size: u64,
    pub offset: u64,
}

/// An offline memory plan, the result of [best_fit].
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    /// The total amount of memory the plan needs.
    pub peak: u64,
    /// Sorted by `(gen, kill)`.
    pub descs: Vec<MemoryDesc>,
}

/// A horizontal segment of the skyline in a [Container]:
/// the time range `[begin, begin + width)` is filled up to `offset`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Step {
    pub begin: i32,
    pub width: i32,
    pub offset: u64,
}

/// Packs rectangles with time on the horizontal and memory on the vertical axis.
///
/// The container keeps the skyline of everything placed so far as a list of steps,
/// sorted by time and with neighbouring steps always at different offsets.
#[derive(Debug, Clone)]
pub struct Container {
    begin: i32,
    end: i32,
    max_height: u64,
    steps: Vec<Step>,
}

impl Step {
    pub fn end(&self) -> i32 {
        self.begin + self.width
    }

    /// Whether a block with the given lifetime fits on top of this step without overhanging it.
    pub fn can_place(&self, gen: i32, kill: i32) -> bool {
        self.begin <= gen && kill <= self.end()
    }
}

impl Container {
    pub fn new(begin: i32, end: i32) -> Self {
        assert!(begin < end, "Container must span at least one time step, got {}..{}", begin, end);
        Container {
            begin,
            end,
            max_height: 0,
            steps: vec![Step {
                begin,
                width: end - begin,
                offset: 0,
            }],
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The highest point of the skyline.
    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    /// The lowest step, the first one if there are multiple.
    pub fn lowest_step(&self) -> Step {
        *self
            .steps
            .iter()
            .min_by_key(|step| step.offset)
            .expect("container always has a step")
    }

    /// Place a rectangle spanning `[begin, begin + width)` with the given height on top of the skyline.
    ///
    /// Returns the offset it was placed at, or `None` if the time range crosses a step boundary.
    pub fn place(&mut self, begin: i32, width: i32, height: u64) -> Option<u64> {
        let end = begin + width;
        if begin < self.begin || end > self.end || width <= 0 {
            return None;
        }

        let index = self.find_step_at(begin);
        let step = self.steps[index];
        if end > step.end() {
            return None;
        }

        let top = step.offset + height;
        self.max_height = self.max_height.max(top);

        let mut inserted = vec![];
        if begin != step.begin {
            inserted.push(Step {
                begin: step.begin,
                width: begin - step.begin,
                offset: step.offset,
            });
        }
        inserted.push(Step { begin, width, offset: top });
        if end != step.end() {
            inserted.push(Step {
                begin: end,
                width: step.end() - end,
                offset: step.offset,
            });
        }

        let count = inserted.len();
        self.steps.splice(index..index + 1, inserted);
        self.try_merge(index.saturating_sub(1), count + 1);

        Some(step.offset)
    }

    /// Raise the step at `time` to its lowest neighbour and merge them.
    ///
    /// Returns false if there is nothing to merge with or the step is higher than its neighbours.
    pub fn lift(&mut self, time: i32) -> bool {
        if self.steps.len() == 1 {
            return false;
        }

        let index = self.find_step_at(time);
        let offset = self.steps[index].offset;
        let left = index.checked_sub(1).map(|i| self.steps[i].offset);
        let right = self.steps.get(index + 1).map(|s| s.offset);

        if left.map_or(false, |l| offset > l) || right.map_or(false, |r| offset > r) {
            return false;
        }
        let target = match (left, right) {
            (Some(l), Some(r)) => l.min(r),
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => unreachable!(),
        };

        self.steps[index].offset = target;
        match (left, right) {
            (Some(_), Some(_)) => self.try_merge(index - 1, 2),
            (Some(_), None) => self.try_merge(index - 1, 1),
            _ => self.try_merge(index, 1),
        }
        true
    }

    fn find_step_at(&self, time: i32) -> usize {
        assert!(
            self.begin <= time && time < self.end,
            "Time {} outside of container {}..{}",
            time,
            self.begin,
            self.end
        );
        self.steps.partition_point(|step| step.begin <= time) - 1
    }

    /// Starting at `start`, try `trials` times to merge a step into the next one if they have the same offset.
    fn try_merge(&mut self, start: usize, trials: usize) {
        let mut index = start;
        for _ in 0..trials {
            if index + 1 >= self.steps.len() {
                return;
            }

            if self.steps[index].offset == self.steps[index + 1].offset {
                let next = self.steps.remove(index + 1);
                self.steps[index].width += next.width;
            } else {
                index += 1;
            }
        }
    }
}

/// Plan the memory of all values in `stat` with the best-fit heuristic of Sekiyama et al.
///
/// Repeatedly takes the lowest step of the skyline and places the longest living unplaced value
/// that fits on it. If none fits, the step is lifted to its lowest neighbour.
pub fn best_fit(stat: &LifetimeStat) -> MemoryPlan {
    let mut unplaced: Vec<Lifetime> = stat.values.clone();
    let mut container = Container::new(stat.begin, stat.end);
    let mut descs = Vec::with_capacity(unplaced.len());

    while !unplaced.is_empty() {
        let step = container.lowest_step();

        let best = unplaced
            .iter()
            .enumerate()
            .filter(|(_, life)| step.can_place(life.gen, life.kill))
            .max_by_key(|(_, life)| (life.length(), life.size, Reverse(life.gen)))
            .map(|(i, _)| i);

        let Some(best) = best else {
            let lifted = container.lift(step.begin);
            assert!(lifted, "Lowest step {:?} could not be lifted", step);
            continue;
        };

        let life = unplaced.remove(best);
        let offset = container
            .place(life.gen, life.length(), life.size)
            .expect("block fits on the lowest step");
        descs.push(MemoryDesc {
            value: life.value,
            gen: life.gen,
            kill: life.kill,
            size: life.size,
            offset,
        });
    }

    descs.sort_by_key(|desc| (desc.gen, desc.kill, desc.value));
    MemoryPlan {
        peak: container.max_height(),
        descs,
    }
}

impl MemoryPlan {
    pub fn offset(&self, value: ValueId) -> Option<u64> {
        self.descs.iter().find(|desc| desc.value == value).map(|desc| desc.offset)
    }

    /// All pairs of values that are alive at the same time and share memory. Empty for a valid plan.
    pub fn conflicts(&self) -> Vec<(ValueId, ValueId)> {
        let mut conflicts = vec![];
        for (i, a) in self.descs.iter().enumerate() {
            for b in &self.descs[i + 1..] {
                // descs are sorted by gen, so no later desc can overlap in time
                if b.gen >= a.kill {
                    break;
                }
                if a.size != 0 && b.size != 0 && a.offset < b.offset + b.size && b.offset < a.offset + a.size {
                    conflicts.push((a.value, b.value));
                }
            }
        }
        conflicts
    }
}

impl Display for MemoryDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} @ {} + {}", self.gen, self.kill, self.offset, self.size)
    }
}

impl Display for MemoryPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "MemoryPlan {{ peak: {}, values: {} }}", self.peak, self.descs.len())?;
        for desc in &self.descs {
            writeln!(f, "  {:?} {}", desc.value, desc)?;
        }
        Ok(())
    }
}
