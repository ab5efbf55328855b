//! System requirements check.

use anyhow::bail;
use herakles_workload_exporter::config::{validate_effective_config, Config};
use herakles_workload_exporter::process::{ProcessSource, ProcfsSource};
use herakles_workload_exporter::profiler::check_tracing_support;
use herakles_workload_exporter::system;
use std::path::{Path, PathBuf};

/// Validates /proc access, profiling prerequisites and the configuration.
pub fn command_check(proc: bool, profiling: bool, all: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles Workload Exporter - System Check");
    println!("============================================");

    let mut all_ok = true;

    if proc || all {
        println!("\n📁 Checking /proc filesystem...");
        for (name, result) in [
            ("loadavg", system::read_load_average().map(|_| ())),
            ("stat", system::read_cpu_counters().map(|_| ())),
            ("meminfo", system::read_total_memory().map(|_| ())),
        ] {
            match result {
                Ok(()) => println!("   ✅ /proc/{name} readable"),
                Err(e) => {
                    println!("   ❌ /proc/{name}: {e}");
                    all_ok = false;
                }
            }
        }

        match ProcfsSource::new(system::PROC_ROOT).collect(5, config.rank_by()) {
            Ok(records) if !records.is_empty() => {
                println!("   ✅ Can read {} process entries", records.len())
            }
            Ok(_) => {
                println!("   ❌ Cannot read any process entries from /proc");
                all_ok = false;
            }
            Err(e) => {
                println!("   ❌ Process scan failed: {e}");
                all_ok = false;
            }
        }
    }

    if profiling || all {
        println!("\n🔬 Checking syscall profiling...");
        match check_tracing_support() {
            Ok(()) => println!("   ✅ Running as root on linux"),
            Err(e) => {
                println!("   ❌ {e}");
                all_ok = false;
            }
        }
        let tracer = config.tracer_path();
        match find_program(&tracer) {
            Some(path) => println!("   ✅ Tracer found: {}", path.display()),
            None => {
                println!("   ❌ Tracer '{}' not found", tracer.display());
                all_ok = false;
            }
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {e}");
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the output above");
        bail!("system check failed")
    }
}

/// Resolves a program name against PATH; paths with a separator are used as is.
fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_program() {
        assert!(find_program(Path::new("sh")).is_some());
        assert!(find_program(Path::new("/nonexistent/strace")).is_none());
        assert!(find_program(Path::new("definitely-not-a-real-tracer")).is_none());
    }
}
