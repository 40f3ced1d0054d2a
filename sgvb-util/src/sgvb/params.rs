use candle_core::{Error, Result, Tensor, Var};
use candle_nn::VarMap;

/// Register a learnable variable in `varmap` with an explicit initial value.
///
/// `VarBuilder` only offers initializers drawn from candle's own generator
/// or constants; this covers data-dependent and seeded random starts. The
/// returned tensor shares storage with the variable, so gradients computed
/// through it update the optimizer's copy.
///
/// # Arguments
/// * `varmap` - Variable map whose `all_vars()` feeds the optimizer
/// * `name` - Unique parameter name
/// * `init` - Initial value; its shape, dtype and device are kept
pub fn learnable_from_tensor(varmap: &VarMap, name: &str, init: &Tensor) -> Result<Tensor> {
    let var = Var::from_tensor(init)?;
    let tensor = var.as_tensor().clone();
    let mut data = varmap
        .data()
        .lock()
        .map_err(|e| Error::Msg(format!("varmap lock poisoned: {}", e)))?;
    if data.contains_key(name) {
        return Err(Error::Msg(format!("duplicate parameter name: {}", name)));
    }
    data.insert(name.to_string(), var);
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_registered_and_trainable() -> Result<()> {
        let varmap = VarMap::new();
        let init = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu)?;
        let w = learnable_from_tensor(&varmap, "w", &init)?;

        assert_eq!(varmap.all_vars().len(), 1);

        let loss = w.sqr()?.sum_all()?;
        let grads = loss.backward()?;
        let g: Vec<f32> = grads.get(&w).expect("gradient for w").to_vec1()?;
        assert_eq!(g, vec![2.0, 4.0, 6.0]);

        assert!(learnable_from_tensor(&varmap, "w", &init).is_err());
        Ok(())
    }
}
