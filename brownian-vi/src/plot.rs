use std::path::Path;

use plotters::prelude::*;

use crate::results::ConditionResults;

/// Box plot of the ELBO estimates, one box per variational family.
pub fn plot_condition(results: &ConditionResults, path: &Path) -> anyhow::Result<()> {
    let mut labels: Vec<String> = vec![];
    let mut boxes: Vec<Quartiles> = vec![];

    for (family, values) in &results.elbo {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            continue;
        }
        labels.push(family.label().to_string());
        boxes.push(Quartiles::new(&finite));
    }

    anyhow::ensure!(
        !boxes.is_empty(),
        "no finite ELBO values to plot for {}",
        results.condition
    );

    let (lo, hi) = boxes
        .iter()
        .flat_map(|q| q.values())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let pad = ((hi - lo) * 0.05).max(1.0);

    let caption = match results.mean_log_evidence() {
        Some(log_z) => format!("{} (mean log Z = {:.2})", results.condition, log_z),
        None => results.condition.to_string(),
    };

    let root = SVGBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(labels[..].into_segmented(), (lo - pad)..(hi + pad))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(l) | SegmentValue::Exact(l) => l.to_string(),
            SegmentValue::Last => String::new(),
        })
        .y_desc("ELBO")
        .draw()?;

    chart.draw_series(
        labels
            .iter()
            .zip(boxes.iter())
            .map(|(label, q)| Boxplot::new_vertical(SegmentValue::CenterOf(label), q).width(30)),
    )?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObservationRule;
    use crate::variational::VariationalFamily;

    #[test]
    fn test_writes_svg() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut res = ConditionResults::new(ObservationRule::Past, &VariationalFamily::ALL);
        for rep in 0..4 {
            res.log_evidence.push(10.0);
            for f in VariationalFamily::ALL {
                res.push_fit(f, 5.0 - rep as f64, 0.0);
            }
        }

        let path = dir.path().join("brownian_Past.svg");
        plot_condition(&res, &path)?;

        let svg = std::fs::read_to_string(&path)?;
        assert!(svg.contains("<svg"));
        assert!(svg.contains("ELBO"));
        Ok(())
    }

    #[test]
    fn test_empty_results_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let res = ConditionResults::new(ObservationRule::Full, &VariationalFamily::ALL);
        assert!(plot_condition(&res, &dir.path().join("x.svg")).is_err());
    }
}
