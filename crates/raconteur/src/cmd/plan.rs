use raconteur_value::copy::to_indices;
use raconteur_value::{CopyPlan, CopyRun};

use crate::cmd::PlanArgs;
use crate::exit::{value_error, CliResult, SUCCESS};
use crate::output::{print_plan, OutputFormat};

pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    let to_usize = |what: &str, values: &[u64]| {
        to_indices(values).map_err(|e| value_error(&format!("invalid {what}"), e))
    };
    let dims_a = to_usize("--dims-a", &args.dims_a)?;
    let pos_a = to_usize("--pos-a", &args.pos_a)?;
    let dims_b = to_usize("--dims-b", &args.dims_b)?;
    let pos_b = to_usize("--pos-b", &args.pos_b)?;
    let count = to_usize("--count", &args.count)?;

    let plan = CopyPlan::new(&dims_a, &pos_a, &dims_b, &pos_b, &count)
        .map_err(|e| value_error("invalid copy", e))?;
    let element_count = plan.element_count();
    let run_len = plan.run_len();
    let runs: Vec<CopyRun> = plan.collect();

    print_plan(&runs, element_count, run_len, format);
    Ok(SUCCESS)
}
