/// Whether the out-of-sample error has stopped decreasing at `epoch`.
///
/// That is the case when `eout[epoch]` is no larger than every one of the previous
/// `n_non_inc_epoch - 1` errors. Epochs before the first one are ignored, so a short history
/// is judged on what is available.
///
/// # Arguments
/// * `eout` - The out-of-sample error of every epoch so far.
/// * `epoch` - The epoch to judge.
/// * `n_non_inc_epoch` - The length of the window, including `epoch`.
pub fn is_eout_stop_decrease(eout: &[usize], epoch: usize, n_non_inc_epoch: usize) -> bool {
    let Some(&current) = eout.get(epoch) else {
        return false;
    };

    (1..n_non_inc_epoch)
        .filter_map(|i| epoch.checked_sub(i))
        .all(|prev| current <= eout[prev])
}
