use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::model::ObservationRule;
use crate::variational::VariationalFamily;

/// Loss trace of one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossCurveRecord {
    pub repetition: usize,
    pub family: VariationalFamily,
    pub loss: Vec<f32>,
}

/// Everything recorded for one observation rule, one entry per repetition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionResults {
    pub condition: ObservationRule,
    /// ELBO estimates keyed by family label
    pub elbo: BTreeMap<VariationalFamily, Vec<f64>>,
    /// Exact log p(y) of each repetition's data
    pub log_evidence: Vec<f64>,
    /// RMSE between the posterior mean path and the simulated ground truth
    #[serde(default)]
    pub path_rmse: BTreeMap<VariationalFamily, Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loss_curves: Vec<LossCurveRecord>,
}

impl ConditionResults {
    pub fn new(condition: ObservationRule, families: &[VariationalFamily]) -> Self {
        Self {
            condition,
            elbo: families.iter().map(|&f| (f, vec![])).collect(),
            log_evidence: vec![],
            path_rmse: families.iter().map(|&f| (f, vec![])).collect(),
            loss_curves: vec![],
        }
    }

    pub fn families(&self) -> Vec<VariationalFamily> {
        self.elbo.keys().copied().collect()
    }

    pub fn num_repetitions(&self) -> usize {
        self.log_evidence.len()
    }

    pub fn push_fit(&mut self, family: VariationalFamily, elbo: f64, rmse: f64) {
        self.elbo.entry(family).or_default().push(elbo);
        self.path_rmse.entry(family).or_default().push(rmse);
    }

    pub fn mean_log_evidence(&self) -> Option<f64> {
        if self.log_evidence.is_empty() {
            None
        } else {
            Some(self.log_evidence.iter().sum::<f64>() / self.log_evidence.len() as f64)
        }
    }
}

pub fn results_file_name(condition: ObservationRule) -> String {
    format!("{}_brownian_results.json", condition.label())
}

pub fn table_file_name(condition: ObservationRule) -> String {
    format!("{}_brownian_results.tsv", condition.label())
}

pub fn loss_curve_file_name(condition: ObservationRule) -> String {
    format!("{}_brownian_loss_curves.tsv", condition.label())
}

pub fn plot_file_name(condition: ObservationRule) -> String {
    format!("brownian_{}.svg", condition.label())
}

fn write_lines(lines: &[String], path: &Path) -> anyhow::Result<()> {
    let mut buf = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(buf, "{}", line)?;
    }
    buf.flush()?;
    Ok(())
}

/// Rows: repetition, one ELBO column per family, then log Z
fn elbo_table(results: &ConditionResults) -> Vec<String> {
    let families = results.families();
    let mut header = vec!["repetition".to_string()];
    header.extend(families.iter().map(|f| f.label().to_string()));
    header.push("logZ".to_string());

    let mut lines = vec![header.join("\t")];
    for rep in 0..results.num_repetitions() {
        let mut row = vec![rep.to_string()];
        for f in &families {
            let v = results.elbo[f].get(rep).copied().unwrap_or(f64::NAN);
            row.push(v.to_string());
        }
        row.push(results.log_evidence[rep].to_string());
        lines.push(row.join("\t"));
    }
    lines
}

fn loss_curve_table(results: &ConditionResults) -> Vec<String> {
    let mut lines = vec!["repetition\tfamily\titer\tloss".to_string()];
    for rec in &results.loss_curves {
        for (iter, loss) in rec.loss.iter().enumerate() {
            lines.push(format!("{}\t{}\t{}\t{}", rec.repetition, rec.family, iter, loss));
        }
    }
    lines
}

/// Persist one condition: JSON record, TSV table, and loss curves if any.
///
/// # Returns
/// Paths of the files written
pub fn write_results(out_dir: &Path, results: &ConditionResults) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = vec![];

    let json_path = out_dir.join(results_file_name(results.condition));
    let buf = BufWriter::new(File::create(&json_path)?);
    serde_json::to_writer_pretty(buf, results)?;
    written.push(json_path);

    let tsv_path = out_dir.join(table_file_name(results.condition));
    write_lines(&elbo_table(results), &tsv_path)?;
    written.push(tsv_path);

    if !results.loss_curves.is_empty() {
        let loss_path = out_dir.join(loss_curve_file_name(results.condition));
        write_lines(&loss_curve_table(results), &loss_path)?;
        written.push(loss_path);
    }

    for p in &written {
        info!("Wrote {:?}", p);
    }
    Ok(written)
}

pub fn read_results(path: &Path) -> anyhow::Result<ConditionResults> {
    let buf = BufReader::new(File::open(path)?);
    let results: ConditionResults = serde_json::from_reader(buf)
        .map_err(|e| anyhow::anyhow!("failed to parse {:?}: {}", path, e))?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_results() -> ConditionResults {
        let mut res = ConditionResults::new(ObservationRule::Bridge, &VariationalFamily::ALL);
        for rep in 0..3 {
            res.log_evidence.push(-1.0 - rep as f64);
            for (k, f) in VariationalFamily::ALL.iter().enumerate() {
                res.push_fit(*f, -10.0 * (k + 1) as f64 - rep as f64, 0.1);
            }
        }
        res
    }

    #[test]
    fn test_json_uses_family_labels() -> anyhow::Result<()> {
        let res = toy_results();
        let json = serde_json::to_value(&res)?;

        assert_eq!(json["condition"], "Bridge");
        let elbo = json["elbo"].as_object().expect("elbo map");
        let keys: Vec<&str> = elbo.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys.len(), 4);
        for label in ["PE", "MF", "MN", "NN"] {
            assert!(keys.contains(&label), "missing {}", label);
            assert_eq!(elbo[label].as_array().map(|v| v.len()), Some(3));
        }
        Ok(())
    }

    #[test]
    fn test_write_and_read_back() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut res = toy_results();
        res.loss_curves.push(LossCurveRecord {
            repetition: 0,
            family: VariationalFamily::Mf,
            loss: vec![3.0, 2.0, 1.0],
        });

        let written = write_results(dir.path(), &res)?;
        assert_eq!(written.len(), 3);

        let back = read_results(&dir.path().join("Bridge_brownian_results.json"))?;
        assert_eq!(back.condition, ObservationRule::Bridge);
        assert_eq!(back.elbo, res.elbo);
        assert_eq!(back.log_evidence, res.log_evidence);

        let table = std::fs::read_to_string(dir.path().join("Bridge_brownian_results.tsv"))?;
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "repetition\tPE\tMF\tMN\tNN\tlogZ");
        assert_eq!(lines.len(), 4);

        let curves = std::fs::read_to_string(dir.path().join("Bridge_brownian_loss_curves.tsv"))?;
        assert_eq!(curves.lines().count(), 4);
        Ok(())
    }
}
