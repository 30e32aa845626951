//! CPU classification by energy-model capacity.
//!
//! Kernels with the EAS sched_domain sysctls expose a `cap_states` table per
//! CPU. Scheduler tests use it to tell the smallest CPUs apart from the rest.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::{sysconf, Pid, SysconfVar};
use thiserror::Error;
use tracing::debug;

/// Where the per-CPU sched_domain tables live.
pub const SCHED_DOMAIN_ROOT: &str = "/proc/sys/kernel/sched_domain";

/// `cap_states` files must be smaller than this.
pub const CAP_STATES_MAX: usize = 1024;

const CPU_ONLINE: &str = "/sys/devices/system/cpu/online";

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("could not open cap_states file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cap_states file {path} does not fit in {CAP_STATES_MAX} bytes")]
    TooLarge { path: PathBuf },

    #[error("malformed cap_states file {path} ({format})")]
    Malformed { path: PathBuf, format: FormatError },

    #[error("failed to pin to CPU {cpu}: {source}")]
    Affinity {
        cpu: usize,
        #[source]
        source: nix::Error,
    },
}

/// Problems with the contents of one `cap_states` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Fewer than three trailing tab separated fields; the value is the
    /// separator (1-3, counted from the end) that was not found.
    #[error("missing tab separator {0}")]
    MissingTab(u8),

    #[error("capacity is not a number")]
    BadNumber,
}

/// Which side of the partition to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityGroup {
    /// CPUs sharing the minimum capacity.
    Smallest,
    /// Every CPU not in the minimum-capacity group.
    Others,
}

/// Extract the capacity from a `cap_states` table.
///
/// The table must end with at least three tab terminated fields, none of
/// them starting the buffer. The capacity is the field closed by the final
/// tab, read like `%d`: leading whitespace, then digits.
pub fn parse_capacity(contents: &str) -> Result<u32, FormatError> {
    let mut end = contents.len();
    let mut last_tab = 0;

    for sep in 1..=3u8 {
        match contents[..end].rfind('\t') {
            Some(i) if i > 0 => {
                if sep == 1 {
                    last_tab = i;
                }
                end = i;
            }
            _ => return Err(FormatError::MissingTab(sep)),
        }
    }

    let field = &contents[..last_tab];
    let start = field.rfind('\t').map_or(0, |i| i + 1);
    let digits: String = field[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();

    digits.parse().map_err(|_| FormatError::BadNumber)
}

/// Reader for the per-CPU `cap_states` tables.
#[derive(Debug, Clone)]
pub struct CapStates {
    root: PathBuf,
}

impl Default for CapStates {
    fn default() -> Self {
        Self::new(SCHED_DOMAIN_ROOT)
    }
}

impl CapStates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, cpu: usize) -> PathBuf {
        self.root
            .join(format!("cpu{cpu}/domain0/group0/energy/cap_states"))
    }

    /// Capacity of one CPU.
    pub fn capacity(&self, cpu: usize) -> Result<u32, CapacityError> {
        let path = self.path_for(cpu);
        let contents = read_bounded(&path)?;
        let cap = parse_capacity(&contents).map_err(|format| CapacityError::Malformed {
            path: path.clone(),
            format,
        })?;

        debug!(cpu, capacity = cap, "Read CPU capacity");
        Ok(cap)
    }

    /// CPUs in `0..ncpus` belonging to `group`, in ascending order.
    pub fn find_cpus_with_capacity(
        &self,
        ncpus: usize,
        group: CapacityGroup,
    ) -> Result<Vec<usize>, CapacityError> {
        let mut smallest = u32::MAX;
        let mut smallest_cpus = Vec::new();

        for cpu in 0..ncpus {
            let cap = self.capacity(cpu)?;
            if cap < smallest {
                smallest = cap;
                smallest_cpus.clear();
                smallest_cpus.push(cpu);
            } else if cap == smallest {
                smallest_cpus.push(cpu);
            }
        }

        Ok(match group {
            CapacityGroup::Smallest => smallest_cpus,
            CapacityGroup::Others => (0..ncpus)
                .filter(|cpu| !smallest_cpus.contains(cpu))
                .collect(),
        })
    }
}

fn read_bounded(path: &Path) -> Result<String, CapacityError> {
    let open_err = |source| CapacityError::Open {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_err)?;
    let mut buf = Vec::with_capacity(CAP_STATES_MAX);
    file.take(CAP_STATES_MAX as u64)
        .read_to_end(&mut buf)
        .map_err(open_err)?;

    if buf.len() == CAP_STATES_MAX {
        return Err(CapacityError::TooLarge {
            path: path.to_path_buf(),
        });
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Number of online CPUs.
///
/// Uses `sysconf(_SC_NPROCESSORS_ONLN)`, then the sysfs online list. The last
/// resort, `available_parallelism`, only counts CPUs this process may run on
/// and undercounts when the harness itself is pinned.
pub fn online_cpus() -> usize {
    sysconf(SysconfVar::_NPROCESSORS_ONLN)
        .ok()
        .flatten()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n > 0)
        .or_else(|| {
            std::fs::read_to_string(CPU_ONLINE)
                .ok()
                .and_then(|list| count_cpulist(&list))
        })
        .or_else(|| std::thread::available_parallelism().ok().map(Into::into))
        .unwrap_or(1)
}

/// Pin the calling thread to `cpu`.
pub fn affine(cpu: usize) -> Result<(), CapacityError> {
    let affinity_err = |source| CapacityError::Affinity { cpu, source };

    let mut set = CpuSet::new();
    set.set(cpu).map_err(affinity_err)?;
    sched_setaffinity(Pid::from_raw(0), &set).map_err(affinity_err)?;

    debug!(cpu, "Pinned thread");
    Ok(())
}

/// Busy-wait for `duration` of wall-clock time.
///
/// With `sleep` set, the loop sleeps 1ms between clock checks instead of
/// spinning.
pub fn burn(duration: Duration, sleep: bool) {
    let end = Instant::now() + duration;
    while Instant::now() <= end {
        if sleep {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Count the CPUs in a kernel cpulist such as `0-3,6,8-9`.
fn count_cpulist(list: &str) -> Option<usize> {
    let mut count = 0;
    for range in list.trim().split(',').filter(|r| !r.is_empty()) {
        count += match range.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.parse().ok()?;
                let hi: usize = hi.parse().ok()?;
                hi.checked_sub(lo)? + 1
            }
            None => {
                range.parse::<usize>().ok()?;
                1
            }
        };
    }
    (count > 0).then_some(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cpu(root: &Path, cpu: usize, contents: &str) {
        let states = CapStates::new(root);
        let path = states.path_for(cpu);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn parse_takes_field_closed_by_final_tab() {
        assert_eq!(parse_capacity("100\t50\t10\t20\t30\t400\t"), Ok(400));
    }

    #[test]
    fn parse_requires_three_tabs() {
        assert_eq!(parse_capacity("400"), Err(FormatError::MissingTab(1)));
        assert_eq!(parse_capacity("400\t"), Err(FormatError::MissingTab(2)));
        assert_eq!(parse_capacity("30\t400\t"), Err(FormatError::MissingTab(3)));
        assert_eq!(parse_capacity("\t30\t400\t"), Err(FormatError::MissingTab(3)));
        assert_eq!(parse_capacity("20\t30\t400\t"), Ok(400));
    }

    #[test]
    fn parse_rejects_non_numeric_capacity() {
        assert_eq!(
            parse_capacity("1\t2\tabc\t"),
            Err(FormatError::BadNumber)
        );
    }

    #[test]
    fn parse_allows_leading_whitespace_and_trailing_text() {
        assert_eq!(parse_capacity("1\t2\t 512kHz\t\n"), Ok(512));
    }

    #[test]
    fn partitions_smallest_and_others() {
        let root = tempfile::tempdir().unwrap();
        let caps = [430, 430, 1024, 1024, 430, 800];
        for (cpu, cap) in caps.iter().enumerate() {
            write_cpu(root.path(), cpu, &format!("100\t5\t10\t{cap}\t"));
        }
        let states = CapStates::new(root.path());

        assert_eq!(
            states
                .find_cpus_with_capacity(caps.len(), CapacityGroup::Smallest)
                .unwrap(),
            vec![0, 1, 4]
        );
        assert_eq!(
            states
                .find_cpus_with_capacity(caps.len(), CapacityGroup::Others)
                .unwrap(),
            vec![2, 3, 5]
        );
    }

    #[test]
    fn smaller_capacity_later_resets_group() {
        let root = tempfile::tempdir().unwrap();
        write_cpu(root.path(), 0, "1\t2\t900\t");
        write_cpu(root.path(), 1, "1\t2\t300\t");
        let states = CapStates::new(root.path());

        assert_eq!(
            states
                .find_cpus_with_capacity(2, CapacityGroup::Smallest)
                .unwrap(),
            vec![1]
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        write_cpu(root.path(), 0, "1\t2\t300\t");
        let states = CapStates::new(root.path());

        let err = states
            .find_cpus_with_capacity(2, CapacityGroup::Smallest)
            .unwrap_err();
        assert!(matches!(err, CapacityError::Open { .. }));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        write_cpu(root.path(), 0, "300\n");
        let err = CapStates::new(root.path()).capacity(0).unwrap_err();
        assert!(matches!(
            err,
            CapacityError::Malformed {
                format: FormatError::MissingTab(1),
                ..
            }
        ));
    }

    #[test]
    fn oversized_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let big = "1\t".repeat(CAP_STATES_MAX);
        write_cpu(root.path(), 0, &big);
        let err = CapStates::new(root.path()).capacity(0).unwrap_err();
        assert!(matches!(err, CapacityError::TooLarge { .. }));
    }

    #[test]
    fn burn_runs_for_requested_time() {
        for sleep in [false, true] {
            let start = Instant::now();
            burn(Duration::from_millis(20), sleep);
            assert!(start.elapsed() >= Duration::from_millis(20));
        }
    }

    #[test]
    fn affine_pins_to_single_cpu() {
        use nix::sched::sched_getaffinity;

        // Affinity is per thread; keep the test thread unpinned.
        std::thread::spawn(|| {
            let allowed = sched_getaffinity(Pid::from_raw(0)).unwrap();
            if !allowed.is_set(0).unwrap() {
                return;
            }

            affine(0).unwrap();

            let pinned = sched_getaffinity(Pid::from_raw(0)).unwrap();
            let cpus: Vec<usize> = (0..CpuSet::count())
                .filter(|&cpu| pinned.is_set(cpu).unwrap())
                .collect();
            assert_eq!(cpus, vec![0]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn affine_rejects_out_of_range_cpu() {
        let err = affine(CpuSet::count()).unwrap_err();
        assert!(matches!(err, CapacityError::Affinity { .. }));
    }

    #[test]
    fn cpulist_counting() {
        assert_eq!(count_cpulist("0-3\n"), Some(4));
        assert_eq!(count_cpulist("0-3,6,8-9"), Some(7));
        assert_eq!(count_cpulist("0"), Some(1));
        assert_eq!(count_cpulist(""), None);
        assert_eq!(count_cpulist("3-1"), None);
        assert!(online_cpus() >= 1);
    }

    #[test]
    fn online_count_is_not_limited_by_affinity() {
        let allowed = std::thread::available_parallelism().unwrap().get();
        assert!(online_cpus() >= allowed);
    }
}
