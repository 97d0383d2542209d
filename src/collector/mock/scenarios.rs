//! Pre-built mock scenarios for testing.
//!
//! These provide realistic kernel counter states: a Linux `/proc` with
//! `meminfo` and ZFS `arcstats`, an illumos kstat chain and a FreeBSD sysctl
//! namespace.

use super::filesystem::MockFs;
use super::kstat::MockKstat;
use super::sysctl::MockSysctl;
use crate::collector::kstat::NamedValue;

/// ARC counters shared by every platform scenario.
const ARC_COUNTERS: &[(&str, u64)] = &[
    ("hits", 9000),
    ("misses", 1000),
    ("demand_data_hits", 4000),
    ("demand_data_misses", 400),
    ("demand_metadata_hits", 3000),
    ("demand_metadata_misses", 300),
    ("prefetch_data_hits", 1500),
    ("prefetch_data_misses", 200),
    ("prefetch_metadata_hits", 500),
    ("prefetch_metadata_misses", 100),
    ("deleted", 123),
    ("mutex_miss", 7),
    ("hash_collisions", 42),
    ("evict_l2_cached", 0),
    ("evict_l2_eligible", 65536),
    ("evict_l2_ineligible", 4096),
    ("size", 2147483648),
    ("l2_hits", 0),
    ("l2_misses", 0),
    ("l2_read_bytes", 0),
    ("l2_write_bytes", 0),
];

impl MockFs {
    /// Creates a typical Linux system with `/proc/meminfo`.
    ///
    /// Includes the detailed slab split (`SReclaimable`/`SUnreclaim`).
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Dirty:              1024 kB
Writeback:             0 kB
Slab:             512000 kB
SReclaimable:     256000 kB
SUnreclaim:       256000 kB
HugePages_Total:       0
",
        );

        fs
    }

    /// Creates a Linux system with the ZFS module loaded.
    ///
    /// `arcstats` uses the SPL layout: a header line, a `name type data`
    /// column line, then one counter per line. There is no `l2_size`.
    pub fn zfs_system() -> Self {
        let mut fs = Self::typical_system();

        let mut arcstats = String::from(
            "13 1 0x01 96 4608 8734651023 934857102384\nname                            type data\n",
        );
        for (name, value) in ARC_COUNTERS {
            arcstats.push_str(&format!("{:<32}4    {}\n", name, value));
        }
        fs.add_file("/proc/spl/kstat/zfs/arcstats", arcstats);

        fs
    }
}

impl MockKstat {
    /// Creates a chain holding `zfs:0:arcstats` without `l2_size`.
    pub fn zfs_arcstats() -> Self {
        let kstat = Self::new();
        let stats: Vec<(&str, NamedValue)> = ARC_COUNTERS
            .iter()
            .map(|&(name, value)| (name, NamedValue::UInt64(value)))
            .collect();
        kstat.add_named("zfs", 0, "arcstats", &stats);
        kstat
    }

    /// Creates a chain holding `unix:0:system_pages`.
    pub fn system_pages() -> Self {
        let kstat = Self::new();
        kstat.add_named(
            "unix",
            0,
            "system_pages",
            &[
                ("physmem", NamedValue::UInt64(1100)),
                ("pagestotal", NamedValue::UInt64(1000)),
                ("pagesfree", NamedValue::UInt64(300)),
                ("pageslocked", NamedValue::UInt64(200)),
                ("pp_kernel", NamedValue::UInt64(150)),
                ("availrmem", NamedValue::UInt64(400)),
            ],
        );
        kstat
    }
}

impl MockSysctl {
    /// Creates a FreeBSD namespace with `kstat.zfs.misc.arcstats.*`.
    pub fn freebsd_arcstats() -> Self {
        let sysctl = Self::new();
        for &(name, value) in ARC_COUNTERS {
            sysctl.set(&format!("kstat.zfs.misc.arcstats.{}", name), value as i64);
        }
        sysctl.set("kstat.zfs.misc.arcstats.allocated", 5000);
        sysctl.set("kstat.zfs.misc.arcstats.stolen", 60);
        sysctl
    }

    /// Creates a FreeBSD namespace with `vm.stats.vm.*` page counters.
    pub fn freebsd_vm() -> Self {
        let sysctl = Self::new();
        sysctl.set("vm.stats.vm.v_page_size", 4096);
        sysctl.set("vm.stats.vm.v_page_count", 1000);
        sysctl.set("vm.stats.vm.v_free_count", 300);
        sysctl.set("vm.stats.vm.v_wire_count", 200);
        sysctl.set("vm.stats.vm.v_active_count", 250);
        sysctl.set("vm.stats.vm.v_inactive_count", 150);
        sysctl.set("vm.stats.vm.v_cache_count", 100);
        sysctl
    }
}
