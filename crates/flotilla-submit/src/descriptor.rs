//! Batch script generation shared by every submission strategy.

use crate::tasks::TaskList;
use flotilla_parsers::{
    MemoryFormat, format_duration_slurm, format_memory_slurm, parse_memory_mb, parse_time_limit,
};
use flotilla_runs::{JobKind, RunContext};
use std::fmt::{self, Write as _};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Invalid time limit {0:?}, expected e.g. 2-00:00:00, 04:00:00 or 90")]
    InvalidTime(String),
    #[error("Invalid memory {0:?}, expected e.g. 4G or 4000M")]
    InvalidMemory(String),
    #[error("At least one CPU per task is required")]
    NoCpus,
    #[error("A partition is required")]
    NoPartition,
}

/// Resources requested for every unit of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub time_limit: Duration,
    pub cpus: u32,
    pub mem_per_cpu_mb: u64,
    pub partition: String,
    pub account: Option<String>,
    /// Environment module loaded before the engine runs.
    pub java_module: Option<String>,
}

impl ResourceSpec {
    /// Validate user-supplied resource values.
    pub fn new(
        time_limit: &str,
        cpus: u32,
        mem_per_cpu: &str,
        partition: &str,
        account: Option<String>,
        java_module: Option<String>,
    ) -> Result<Self, ResourceError> {
        let time_limit = parse_time_limit(time_limit)
            .ok_or_else(|| ResourceError::InvalidTime(time_limit.to_string()))?;
        let mem_per_cpu_mb = parse_memory_mb(mem_per_cpu, MemoryFormat::Slurm)
            .filter(|&mb| mb > 0)
            .ok_or_else(|| ResourceError::InvalidMemory(mem_per_cpu.to_string()))?;
        if cpus == 0 {
            return Err(ResourceError::NoCpus);
        }
        let partition = partition.trim();
        if partition.is_empty() {
            return Err(ResourceError::NoPartition);
        }

        Ok(Self {
            time_limit,
            cpus,
            mem_per_cpu_mb,
            partition: partition.to_string(),
            account: account.filter(|a| !a.trim().is_empty()),
            java_module: java_module.filter(|m| !m.trim().is_empty()),
        })
    }
}

/// How the runner body invokes the wrapped workflow engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSpec {
    /// Command prefix, e.g. `nextflow run`.
    pub engine: String,
    pub pipeline: String,
    /// Flag that receives the task name, e.g. `--sample`.
    pub task_param: String,
    /// Flag that receives the task's output directory.
    pub outdir_param: String,
    pub extra_args: Vec<String>,
}

impl WorkflowSpec {
    pub fn new(engine: &str, pipeline: &str) -> Self {
        Self {
            engine: engine.to_string(),
            pipeline: pipeline.to_string(),
            task_param: "--sample".to_string(),
            outdir_param: "--outdir".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Array index range `start-end[%max_concurrency]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayRange {
    pub start: usize,
    pub end: usize,
    pub max_concurrency: Option<usize>,
}

impl ArrayRange {
    /// None for a single task, which runs as a plain job. The cap is
    /// clamped to the task count; a zero cap means no cap.
    pub fn new(task_count: usize, cap: Option<usize>) -> Option<Self> {
        if task_count <= 1 {
            return None;
        }
        Some(Self {
            start: 1,
            end: task_count,
            max_concurrency: cap.filter(|&c| c > 0).map(|c| c.min(task_count)),
        })
    }
}

impl fmt::Display for ArrayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)?;
        if let Some(cap) = self.max_concurrency {
            write!(f, "%{}", cap)?;
        }
        Ok(())
    }
}

/// Where the runner gets its task name from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskBinding {
    StaticName(String),
    /// Line `SLURM_ARRAY_TASK_ID` of the task list artifact.
    IndexResolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDescriptor {
    pub mode: JobKind,
    pub job_name: String,
    pub array_range: Option<ArrayRange>,
    pub task_binding: TaskBinding,
}

/// Renders submission descriptors into sbatch scripts.
#[derive(Debug, Clone)]
pub struct DescriptorGenerator {
    resources: ResourceSpec,
    workflow: WorkflowSpec,
}

impl DescriptorGenerator {
    pub fn new(resources: ResourceSpec, workflow: WorkflowSpec) -> Self {
        Self {
            resources,
            workflow,
        }
    }

    /// One array job covering every task.
    pub fn array(&self, ctx: &RunContext, tasks: &TaskList, cap: Option<usize>) -> SubmissionDescriptor {
        SubmissionDescriptor {
            mode: JobKind::Array,
            job_name: format!("flotilla_{}", ctx.run_id),
            array_range: ArrayRange::new(tasks.len(), cap),
            task_binding: TaskBinding::IndexResolved,
        }
    }

    /// One job for one task.
    pub fn individual(&self, name: &str) -> SubmissionDescriptor {
        SubmissionDescriptor {
            mode: JobKind::Individual,
            job_name: name.to_string(),
            array_range: None,
            task_binding: TaskBinding::StaticName(name.to_string()),
        }
    }

    /// Render the full script: directives, then the runner body.
    pub fn render(&self, ctx: &RunContext, descriptor: &SubmissionDescriptor) -> String {
        Script {
            generator: self,
            ctx,
            descriptor,
        }
        .to_string()
    }
}

/// A batch script ready to be written out.
struct Script<'a> {
    generator: &'a DescriptorGenerator,
    ctx: &'a RunContext,
    descriptor: &'a SubmissionDescriptor,
}

impl fmt::Display for Script<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#!/bin/bash\n")?;
        self.write_directives(f)?;
        f.write_str("set -u\n\n")?;
        self.write_task_resolution(f)?;
        self.write_engine_call(f)
    }
}

impl Script<'_> {
    fn write_directives(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.generator.resources;
        let descriptor = self.descriptor;
        let mut directive = |line: String| writeln!(out, "#SBATCH {}", line);

        directive(format!("--job-name={}", descriptor.job_name))?;
        directive(format!(
            "--time={}",
            format_duration_slurm(r.time_limit.as_secs())
        ))?;
        directive(format!("--cpus-per-task={}", r.cpus))?;
        directive(format!("--mem-per-cpu={}", format_memory_slurm(r.mem_per_cpu_mb)))?;
        directive(format!("--partition={}", r.partition))?;
        if let Some(account) = &r.account {
            directive(format!("--account={}", account))?;
        }

        // %A_%a only resolve inside arrays; %j is the plain job id.
        let log_stem = match descriptor.array_range {
            Some(range) => {
                directive(format!("--array={}", range))?;
                "%x_%A_%a"
            }
            None => "%x_%j",
        };
        let logs = self.ctx.logs_dir();
        directive(format!("--output={}/{}.out", logs, log_stem))?;
        directive(format!("--error={}/{}.err", logs, log_stem))
    }

    fn write_task_resolution(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.descriptor.task_binding {
            TaskBinding::StaticName(name) => {
                writeln!(out, "TASK={}", shell_quote(name))?;
            }
            TaskBinding::IndexResolved => {
                let task_list = shell_quote(self.ctx.store().task_list_path().as_str());
                writeln!(out, "IDX=${{SLURM_ARRAY_TASK_ID:-1}}")?;
                writeln!(out, "TASK=$(sed -n \"${{IDX}}p\" {})", task_list)?;
                writeln!(out, "if [ -z \"$TASK\" ]; then")?;
                writeln!(
                    out,
                    "    echo \"flotilla: no task at line ${{IDX}} of \"{} >&2",
                    task_list
                )?;
                writeln!(out, "    exit 2")?;
                writeln!(out, "fi")?;
            }
        }
        out.write_char('\n')
    }

    fn write_engine_call(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wf = &self.generator.workflow;
        let ctx = self.ctx;

        if let Some(module) = &self.generator.resources.java_module {
            writeln!(out, "module load {}\n", shell_quote(module))?;
        }

        writeln!(out, "WORK_DIR={}/\"$TASK\"", shell_quote(ctx.work_base.as_str()))?;
        writeln!(out, "OUT_DIR={}/\"$TASK\"", shell_quote(ctx.output_base.as_str()))?;
        writeln!(out, "mkdir -p \"$WORK_DIR\" \"$OUT_DIR\"\n")?;

        writeln!(out, "echo \"flotilla: running task $TASK on $(hostname)\"")?;
        writeln!(out, "{} {} \\", wf.engine.trim(), shell_quote(&wf.pipeline))?;
        writeln!(out, "    -with-report \"$WORK_DIR/report.html\" \\")?;
        writeln!(out, "    -with-trace \"$WORK_DIR/trace.txt\" \\")?;
        writeln!(out, "    -with-timeline \"$WORK_DIR/timeline.html\" \\")?;
        writeln!(out, "    -work-dir \"$WORK_DIR\" \\")?;
        write!(
            out,
            "    {} \"$TASK\" \\\n    {} \"$OUT_DIR\"",
            shell_quote(&wf.task_param),
            shell_quote(&wf.outdir_param)
        )?;
        for arg in &wf.extra_args {
            write!(out, " \\\n    {}", shell_quote(arg))?;
        }
        out.write_char('\n')?;

        writeln!(out, "STATUS=$?")?;
        writeln!(out, "echo \"flotilla: task $TASK exited with status $STATUS\"")?;
        writeln!(out, "exit $STATUS")
    }
}

/// Quote a word for bash. Plain words are left alone.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '=' | '+' | ','));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    fn generator() -> DescriptorGenerator {
        let resources = ResourceSpec::new("1-00:00:00", 4, "4G", "normal", Some("lab".into()), Some("java/17".into())).unwrap();
        let mut workflow = WorkflowSpec::new("nextflow run", "nf-core/rnaseq");
        workflow.extra_args = vec!["-profile".into(), "singularity".into()];
        DescriptorGenerator::new(resources, workflow)
    }

    fn ctx() -> RunContext {
        RunContext::new(Utf8Path::new("/scratch/runs"), None, None, Some("r1".into()))
    }

    #[test]
    fn test_array_range() {
        assert_eq!(ArrayRange::new(3, Some(2)).unwrap().to_string(), "1-3%2");
        assert_eq!(ArrayRange::new(3, Some(10)).unwrap().to_string(), "1-3%3");
        assert_eq!(ArrayRange::new(5, None).unwrap().to_string(), "1-5");
        assert_eq!(ArrayRange::new(5, Some(0)).unwrap().to_string(), "1-5");
        assert_eq!(ArrayRange::new(1, Some(4)), None);
        assert_eq!(ArrayRange::new(0, None), None);
    }

    #[test]
    fn test_effective_cap_never_exceeds_task_count() {
        for n in 2..20 {
            for c in 1..25 {
                let range = ArrayRange::new(n, Some(c)).unwrap();
                assert_eq!(range.max_concurrency, Some(c.min(n)));
            }
        }
    }

    #[test]
    fn test_resource_validation() {
        let spec = ResourceSpec::new("90", 2, "1000M", "short", None, None).unwrap();
        assert_eq!(spec.time_limit, Duration::from_secs(5400));
        assert_eq!(spec.mem_per_cpu_mb, 1000);

        assert_eq!(
            ResourceSpec::new("soon", 1, "4G", "p", None, None),
            Err(ResourceError::InvalidTime("soon".into()))
        );
        assert_eq!(
            ResourceSpec::new("1:00:00", 1, "lots", "p", None, None),
            Err(ResourceError::InvalidMemory("lots".into()))
        );
        assert_eq!(
            ResourceSpec::new("1:00:00", 0, "4G", "p", None, None),
            Err(ResourceError::NoCpus)
        );
        assert_eq!(
            ResourceSpec::new("1:00:00", 1, "4G", " ", None, None),
            Err(ResourceError::NoPartition)
        );
    }

    #[test]
    fn test_render_array_script() {
        let ctx = ctx();
        let tasks = TaskList::from_names(["s1", "s2", "s3"]).unwrap();
        let generator = generator();
        let script = generator.render(&ctx, &generator.array(&ctx, &tasks, Some(2)));

        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=flotilla_r1\n"));
        assert!(script.contains("#SBATCH --time=1-00:00:00\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=4\n"));
        assert!(script.contains("#SBATCH --mem-per-cpu=4096M\n"));
        assert!(script.contains("#SBATCH --partition=normal\n"));
        assert!(script.contains("#SBATCH --account=lab\n"));
        assert!(script.contains("#SBATCH --array=1-3%2\n"));
        assert!(script.contains("#SBATCH --output=/scratch/runs/r1/logs/%x_%A_%a.out\n"));
        assert!(script.contains("IDX=${SLURM_ARRAY_TASK_ID:-1}\n"));
        assert!(script.contains("TASK=$(sed -n \"${IDX}p\" /scratch/runs/r1/tasks.txt)\n"));
        assert!(script.contains("    exit 2\n"));
        assert!(script.contains("module load java/17\n"));
        assert!(script.contains("WORK_DIR=/scratch/runs/r1/work/\"$TASK\"\n"));
        assert!(script.contains("nextflow run nf-core/rnaseq \\\n"));
        assert!(script.contains("-with-trace \"$WORK_DIR/trace.txt\""));
        assert!(script.contains("    --sample \"$TASK\" \\\n    --outdir \"$OUT_DIR\" \\\n    -profile \\\n    singularity\n"));
        assert!(script.ends_with("STATUS=$?\necho \"flotilla: task $TASK exited with status $STATUS\"\nexit $STATUS\n"));
    }

    #[test]
    fn test_single_task_array_has_no_array_directive() {
        let ctx = ctx();
        let tasks = TaskList::from_names(["only"]).unwrap();
        let generator = generator();
        let descriptor = generator.array(&ctx, &tasks, Some(3));
        assert_eq!(descriptor.array_range, None);

        let script = generator.render(&ctx, &descriptor);
        assert!(!script.contains("--array"));
        assert!(script.contains("%x_%j.out"));
        // The runner still reads line 1 of the task list.
        assert!(script.contains("IDX=${SLURM_ARRAY_TASK_ID:-1}"));
    }

    #[test]
    fn test_render_individual_script() {
        let ctx = RunContext::new(
            Utf8Path::new("/runs"),
            Some("/my work".into()),
            None,
            Some("r2".into()),
        );
        let resources = ResourceSpec::new("04:00:00", 1, "2G", "p", None, None).unwrap();
        let generator = DescriptorGenerator::new(resources, WorkflowSpec::new("nextflow run", "main.nf"));
        let script = generator.render(&ctx, &generator.individual("sampleA"));

        assert!(script.contains("#SBATCH --job-name=sampleA\n"));
        assert!(script.contains("#SBATCH --time=04:00:00\n"));
        assert!(!script.contains("--account"));
        assert!(!script.contains("module load"));
        assert!(!script.contains("sed -n"));
        assert!(script.contains("TASK=sampleA\n"));
        assert!(script.contains("WORK_DIR='/my work'/\"$TASK\"\n"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("s1"), "s1");
        assert_eq!(shell_quote("nf-core/rnaseq"), "nf-core/rnaseq");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
