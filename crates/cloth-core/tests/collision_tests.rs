use approx::assert_relative_eq;
use cloth_core::math::xyz;
use cloth_core::{ClothError, Factory, FabricData, IndexPair, Platform, Solver, SolverConfig};
use glam::{Vec3, Vec4};

const FRAME_DT: f32 = 1.0 / 60.0;

/// Solver holding one unconstrained cloth simulated once per frame.
fn free_particles(current: &[Vec4], previous: &[Vec4]) -> (Solver, cloth_core::ClothHandle) {
    let mut factory = Factory::new(Platform::Cpu);
    let fabric = factory
        .create_fabric(&FabricData {
            num_particles: current.len() as u32,
            ..Default::default()
        })
        .unwrap();
    let mut cloth = factory.create_cloth(current, fabric).unwrap();
    cloth.set_solver_frequency(60.0);
    cloth.previous_particles_mut().copy_from_slice(previous);

    let mut solver = factory.create_solver(SolverConfig::default());
    let handle = solver.add_cloth(cloth).unwrap();
    (solver, handle)
}

#[test]
fn test_particle_inside_sphere_moves_to_surface() {
    let start = [Vec4::new(0.3, 0.4, 0.0, 1.0), Vec4::new(0.0, 3.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    solver
        .cloth_mut(handle)
        .unwrap()
        .set_spheres(&[Vec4::new(0.0, 0.0, 0.0, 1.0)], 0, 0)
        .unwrap();

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles();
    let pushed = xyz(p[0]);
    assert_relative_eq!(pushed.length(), 1.0, epsilon = 1e-5);
    // along the center to particle line
    assert!(pushed.abs_diff_eq(Vec3::new(0.6, 0.8, 0.0), 1e-5), "pushed to {pushed}");
    assert_eq!(p[1], start[1]);
}

#[test]
fn test_continuous_collision_stops_tunneling() {
    // moves 3 units per iteration, straight through a unit sphere
    let current = [Vec4::new(-1.5, 0.0, 0.0, 1.0)];
    let previous = [Vec4::new(-4.5, 0.0, 0.0, 1.0)];
    let sphere = [Vec4::new(0.0, 0.0, 0.0, 1.0)];

    let (mut solver, handle) = free_particles(&current, &previous);
    solver.cloth_mut(handle).unwrap().set_spheres(&sphere, 0, 0).unwrap();
    solver.simulate(FRAME_DT);
    let end = solver.cloth(handle).unwrap().current_particles()[0];
    assert_relative_eq!(end.x, 1.5, epsilon = 1e-5);

    let (mut solver, handle) = free_particles(&current, &previous);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth.set_spheres(&sphere, 0, 0).unwrap();
    cloth.set_continuous_collision(true);
    solver.simulate(FRAME_DT);
    let end = solver.cloth(handle).unwrap().current_particles()[0];
    assert!(end.x <= -0.99 && end.x >= -1.5, "particle should stop at the entry point, x = {}", end.x);
}

#[test]
fn test_capsule_pushes_particle_out() {
    let start = [Vec4::new(1.0, 0.5, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth
        .set_spheres(&[Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(2.0, 0.0, 0.0, 1.0)], 0, 0)
        .unwrap();
    cloth.set_capsules(&[IndexPair::new(0, 1)], 0, 0).unwrap();

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles()[0];
    assert_relative_eq!(p.x, 1.0, epsilon = 1e-4);
    assert_relative_eq!(p.y, 1.0, epsilon = 1e-4);
}

#[test]
fn test_convex_keeps_particle_above_plane() {
    let start = [Vec4::new(0.0, -0.25, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    // half space y >= 0
    cloth.set_planes(&[Vec4::new(0.0, 1.0, 0.0, 0.0)], 0, 0).unwrap();
    cloth.set_convexes(&[1], 0, 0).unwrap();

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles()[0];
    assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
}

#[test]
fn test_triangle_blocks_particle() {
    let start = [Vec4::new(0.25, 0.25, -0.1, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let triangle = [Vec3::ZERO, Vec3::X, Vec3::Y];
    solver.cloth_mut(handle).unwrap().set_triangles(&triangle, 0, 0).unwrap();

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles()[0];
    assert!(p.z.abs() < 1e-4 || p.z > 0.0, "particle left behind the triangle: {p}");
}

#[test]
fn test_too_many_spheres_are_rejected() {
    let start = [Vec4::new(0.0, 0.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let spheres = vec![Vec4::new(5.0, 0.0, 0.0, 0.5); 33];
    let err = solver.cloth_mut(handle).unwrap().set_spheres(&spheres, 0, 0).unwrap_err();
    assert!(matches!(err, ClothError::TooManyPrimitives { count: 33, .. }));
}

#[test]
fn test_self_collision_separates_close_particles() {
    let start = [Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(0.02, 0.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth.set_self_collision_distance(0.1);
    cloth.set_self_collision_stiffness(1.0);

    let summary = solver.simulate(FRAME_DT);
    assert_eq!(summary.num_self_collisions, 1);

    let p = solver.cloth(handle).unwrap().current_particles();
    assert_relative_eq!(xyz(p[0]).distance(xyz(p[1])), 0.1, epsilon = 1e-4);
}

#[test]
fn test_self_collision_skips_coincident_particles() {
    let start = [
        Vec4::new(0.0, 0.0, 0.0, 1.0),
        Vec4::new(0.0, 0.0, 0.0, 1.0),
        Vec4::new(1.0, 0.0, 0.0, 1.0),
    ];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth.set_self_collision_distance(0.1);
    cloth.set_self_collision_stiffness(1.0);

    let summary = solver.simulate(FRAME_DT);
    assert_eq!(summary.num_self_collisions, 0);
    assert_eq!(solver.cloth(handle).unwrap().current_particles(), &start[..]);
}

#[test]
fn test_single_particle_self_collision() {
    let start = [Vec4::new(0.3, -0.2, 0.1, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    solver.cloth_mut(handle).unwrap().set_self_collision_distance(0.1);

    for _ in 0..2 {
        assert_eq!(solver.simulate(FRAME_DT).num_self_collisions, 0);
    }
    assert_eq!(solver.cloth(handle).unwrap().current_particles(), &start[..]);
}

#[test]
fn test_self_collision_respects_rest_positions() {
    let start = [Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(0.02, 0.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth.set_self_collision_distance(0.1);
    cloth.set_rest_positions(&start).unwrap();

    let summary = solver.simulate(FRAME_DT);
    assert_eq!(summary.num_self_collisions, 0);
    assert_eq!(solver.cloth(handle).unwrap().current_particles(), &start[..]);
}

#[test]
fn test_motion_constraint_limits_distance() {
    let start = [Vec4::new(2.0, 0.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    let cloth = solver.cloth_mut(handle).unwrap();
    cloth.set_motion_constraints(&[Vec4::new(0.0, 0.0, 0.0, 0.5)]).unwrap();
    cloth.set_motion_constraint_stiffness(1.0);

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles()[0];
    assert_relative_eq!(p.x, 0.5, epsilon = 1e-5);
}

#[test]
fn test_separation_constraint_keeps_particle_outside() {
    let start = [Vec4::new(0.2, 0.0, 0.0, 1.0)];
    let (mut solver, handle) = free_particles(&start, &start);
    solver
        .cloth_mut(handle)
        .unwrap()
        .set_separation_constraints(&[Vec4::new(0.0, 0.0, 0.0, 1.0)])
        .unwrap();

    solver.simulate(FRAME_DT);

    let p = solver.cloth(handle).unwrap().current_particles()[0];
    assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
}
