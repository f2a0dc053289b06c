use atag_one::{round_half, Error, TemperatureBounds};

#[test]
fn rounding_examples() {
    assert_eq!(round_half(18.2), 18.0);
    assert_eq!(round_half(18.3), 18.5);
    assert_eq!(round_half(18.7), 18.5);
    assert_eq!(round_half(18.8), 19.0);
}

#[test]
fn rounding_lands_on_nearest_half_degree() {
    // Tenths from 4.0 to 30.0.
    for tenth in 40..=300 {
        let t = f64::from(tenth) / 10.0;
        let r = round_half(t);
        assert_eq!((r * 2.0).fract(), 0.0, "{t} -> {r}");
        assert!((r - t).abs() <= 0.25 + 1e-9, "{t} -> {r}");
    }
}

#[test]
fn quarter_ties_round_up() {
    for whole in 4..30 {
        let base = f64::from(whole);
        assert_eq!(round_half(base + 0.25), base + 0.5);
        assert_eq!(round_half(base + 0.75), base + 1.0);
    }
}

#[test]
fn local_bounds_reject_outside_values() {
    let bounds = TemperatureBounds::LOCAL;
    for t in [-10.0, 0.0, 3.99, 27.01, 30.0, 100.0] {
        assert!(matches!(bounds.setpoint(t), Err(Error::IllegalArgument(_))), "{t}");
    }
    for t in [4.0, 12.3, 27.0] {
        assert!(bounds.setpoint(t).is_ok(), "{t}");
    }
}

#[test]
fn custom_bounds() {
    let bounds = TemperatureBounds::new(10.0, 20.0);
    assert_eq!(bounds.setpoint(19.8).unwrap(), 20.0);
    assert!(bounds.setpoint(9.5).is_err());
}
