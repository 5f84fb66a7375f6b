//! Capacitated vehicle routing with optional time windows.
//!
//! The solver is a seeded cheapest-insertion construction followed by 2-opt
//! and or-opt local search, restarted from shuffled insertion orders. Hard
//! constraints (capacity, time windows, maximum route duration) are enforced
//! during search: a move that violates them is simply not a move. When no
//! assignment can honor the constraints the solve fails with a diagnostic
//! naming the binding constraint; it never drops a stop or violates capacity
//! silently.
//!
//! The search is time-boxed. On expiry the best feasible solution found so
//! far is returned flagged `partial` (anytime behavior), which is still
//! actionable for dispatch.
//!
//! With the default fixed seed the solve is reproducible; re-running an
//! unchanged stop list yields the same or a cheaper solution.

use std::time::{Duration as StdDuration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::{EngineError, RoutingDiagnostic};

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let radius_km = 6371.0_f64;
    let (lat1_rad, lon1_rad) = (lat1.to_radians(), lon1.to_radians());
    let (lat2_rad, lon2_rad) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;
    let a =
        (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    radius_km * c
}

/// Delivery window in minutes from depot departure. Arriving early waits;
/// arriving after `end_minute` is infeasible for that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeWindow {
    pub start_minute: u32,
    pub end_minute: u32,
}

/// One requested delivery stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct DeliveryStop {
    #[validate(length(min = 1, max = 100))]
    pub stop_id: String,
    #[validate(length(min = 1, max = 100))]
    pub client_id: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    pub demand_qty: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_minutes: Option<u32>,
}

/// The departure/return point for all vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct Depot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

/// Per-request vehicle overrides; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct VehicleOptions {
    pub capacity: Option<u32>,
    pub avg_speed_kmh: Option<f64>,
    pub service_minutes: Option<u32>,
    pub max_route_minutes: Option<u32>,
}

/// Objective presets exposed to the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectivePreset {
    Balanced,
    DistanceFirst,
    TimeFirst,
    CostFirst,
}

impl Default for ObjectivePreset {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub distance: f64,
    pub time: f64,
    pub vehicles: f64,
}

impl ObjectivePreset {
    pub fn weights(self) -> ObjectiveWeights {
        match self {
            Self::Balanced => ObjectiveWeights {
                distance: 1.0,
                time: 1.0,
                vehicles: 1.0,
            },
            Self::DistanceFirst => ObjectiveWeights {
                distance: 3.0,
                time: 0.5,
                vehicles: 1.0,
            },
            Self::TimeFirst => ObjectiveWeights {
                distance: 0.5,
                time: 3.0,
                vehicles: 1.0,
            },
            Self::CostFirst => ObjectiveWeights {
                distance: 1.0,
                time: 0.25,
                vehicles: 3.0,
            },
        }
    }
}

/// Solver defaults; every field can be overridden per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RoutingConfig {
    pub default_capacity: u32,
    pub avg_speed_kmh: f64,
    pub service_minutes: u32,
    pub max_route_minutes: u32,
    pub cost_per_km: f64,
    pub vehicle_fixed_cost: f64,
    pub preset: ObjectivePreset,
    pub time_limit_ms: u64,
    pub seed: u64,
    pub restarts: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_capacity: 1000,
            avg_speed_kmh: 50.0,
            service_minutes: 15,
            max_route_minutes: 480,
            cost_per_km: 1.6,
            vehicle_fixed_cost: 50.0,
            preset: ObjectivePreset::Balanced,
            time_limit_ms: 2_000,
            seed: 7,
            restarts: 4,
        }
    }
}

/// Per-request solver overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SolverOptions {
    pub preset: Option<ObjectivePreset>,
    pub time_limit_ms: Option<u64>,
    /// Fixed seed for reproducible solves (testing and replays).
    pub seed: Option<u64>,
}

/// One stop with its assigned order and schedule on a route.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlannedStop {
    pub stop_id: String,
    pub client_id: String,
    pub lat: f64,
    pub lng: f64,
    pub demand_qty: u32,
    pub sequence: u32,
    pub arrival_minute: f64,
    pub wait_minutes: f64,
    pub departure_minute: f64,
}

/// One vehicle's route.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Route {
    pub route_id: String,
    pub warehouse_id: String,
    pub stops: Vec<PlannedStop>,
    pub total_distance_km: f64,
    pub estimated_minutes: f64,
    pub estimated_cost: f64,
    pub efficiency_score: f64,
    pub total_demand: u32,
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EfficiencyDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStatistics {
    pub total_routes: usize,
    pub total_stops: usize,
    pub total_distance_km: f64,
    pub total_minutes: f64,
    pub total_cost: f64,
    pub average_distance_km: f64,
    pub average_minutes: f64,
    pub average_stops: f64,
    pub efficiency_distribution: EfficiencyDistribution,
    /// Stop-weighted average of per-route efficiency.
    pub overall_efficiency: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoutingSolution {
    pub warehouse_id: String,
    pub routes: Vec<Route>,
    pub statistics: RouteStatistics,
    /// True when the time budget expired before the search converged; the
    /// solution is the best feasible one found so far.
    pub partial: bool,
}

/// Normalized efficiency: straight-line out-and-back lower bound over actual
/// distance, scaled to [0, 100]. Reproducible from the route's own values.
pub fn efficiency_score(lower_bound_km: f64, actual_km: f64) -> f64 {
    if actual_km <= f64::EPSILON {
        return 100.0;
    }
    (100.0 * lower_bound_km / actual_km).clamp(0.0, 100.0)
}

struct Problem<'a> {
    stops: &'a [DeliveryStop],
    /// Index 0 is the depot; stop i is at index i + 1.
    dist: Vec<Vec<f64>>,
    capacity: u32,
    speed_kmh: f64,
    default_service_minutes: u32,
    max_route_minutes: u32,
    weights: ObjectiveWeights,
    vehicle_fixed_cost: f64,
}

impl Problem<'_> {
    fn travel_minutes(&self, from: usize, to: usize) -> f64 {
        self.dist[from][to] / self.speed_kmh * 60.0
    }

    fn service_minutes(&self, stop: usize) -> f64 {
        self.stops[stop]
            .service_minutes
            .unwrap_or(self.default_service_minutes) as f64
    }
}

struct StopTiming {
    arrival: f64,
    wait: f64,
    departure: f64,
}

struct RouteSchedule {
    distance_km: f64,
    total_minutes: f64,
    demand: u32,
    timings: Vec<StopTiming>,
}

#[derive(Debug)]
enum Violation {
    Capacity,
    TimeWindow(usize),
    Duration(usize),
}

/// Simulates one route; fails on the first violated hard constraint.
fn route_schedule(route: &[usize], problem: &Problem<'_>) -> Result<RouteSchedule, Violation> {
    let mut demand: u32 = 0;
    for &stop in route {
        demand = demand.saturating_add(problem.stops[stop].demand_qty);
    }
    if demand > problem.capacity {
        return Err(Violation::Capacity);
    }

    let mut timings = Vec::with_capacity(route.len());
    let mut distance_km = 0.0;
    let mut clock = 0.0_f64;
    let mut prev = 0usize; // depot

    for &stop in route {
        let node = stop + 1;
        distance_km += problem.dist[prev][node];
        clock += problem.travel_minutes(prev, node);
        let arrival = clock;
        let mut wait = 0.0;

        if let Some(window) = problem.stops[stop].time_window {
            if arrival < window.start_minute as f64 {
                wait = window.start_minute as f64 - arrival;
                clock = window.start_minute as f64;
            }
            if clock > window.end_minute as f64 {
                return Err(Violation::TimeWindow(stop));
            }
        }

        clock += problem.service_minutes(stop);
        timings.push(StopTiming {
            arrival,
            wait,
            departure: clock,
        });

        if clock > problem.max_route_minutes as f64 {
            return Err(Violation::Duration(stop));
        }
        prev = node;
    }

    distance_km += problem.dist[prev][0];
    clock += problem.travel_minutes(prev, 0);
    if clock > problem.max_route_minutes as f64 {
        return Err(Violation::Duration(*route.last().expect("non-empty route")));
    }

    Ok(RouteSchedule {
        distance_km,
        total_minutes: clock,
        demand,
        timings,
    })
}

fn route_cost(schedule: &RouteSchedule, problem: &Problem<'_>) -> f64 {
    problem.weights.distance * schedule.distance_km + problem.weights.time * schedule.total_minutes
}

fn solution_cost(routes: &[Vec<usize>], problem: &Problem<'_>) -> Option<f64> {
    let mut cost = problem.weights.vehicles * problem.vehicle_fixed_cost * routes.len() as f64;
    for route in routes {
        let schedule = route_schedule(route, problem).ok()?;
        cost += route_cost(&schedule, problem);
    }
    Some(cost)
}

/// Cheapest feasible insertion over `order`. Succeeds whenever every stop is
/// singleton-feasible, because a fresh route is always a candidate.
fn construct(order: &[usize], problem: &Problem<'_>) -> Vec<Vec<usize>> {
    let mut routes: Vec<Vec<usize>> = Vec::new();

    for &stop in order {
        let mut best: Option<(f64, usize, usize)> = None; // (delta, route, position)

        for (r, route) in routes.iter().enumerate() {
            let current = match route_schedule(route, problem) {
                Ok(schedule) => route_cost(&schedule, problem),
                Err(_) => continue,
            };
            for pos in 0..=route.len() {
                let mut candidate = route.clone();
                candidate.insert(pos, stop);
                if let Ok(schedule) = route_schedule(&candidate, problem) {
                    let delta = route_cost(&schedule, problem) - current;
                    if best.map_or(true, |(best_delta, _, _)| delta < best_delta) {
                        best = Some((delta, r, pos));
                    }
                }
            }
        }

        let fresh_delta = match route_schedule(&[stop], problem) {
            Ok(schedule) => {
                route_cost(&schedule, problem)
                    + problem.weights.vehicles * problem.vehicle_fixed_cost
            }
            Err(_) => f64::INFINITY,
        };

        match best {
            Some((delta, r, pos)) if delta <= fresh_delta => routes[r].insert(pos, stop),
            _ => routes.push(vec![stop]),
        }
    }

    routes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchStep {
    Improved,
    Converged,
    DeadlineHit,
}

/// One first-improvement pass of 2-opt and or-opt.
fn improve_once(
    routes: &mut Vec<Vec<usize>>,
    problem: &Problem<'_>,
    deadline: Instant,
) -> SearchStep {
    // 2-opt: reverse a segment within a route.
    for r in 0..routes.len() {
        let len = routes[r].len();
        if len < 3 {
            continue;
        }
        let current = match route_schedule(&routes[r], problem) {
            Ok(schedule) => route_cost(&schedule, problem),
            Err(_) => continue,
        };
        for i in 0..len - 1 {
            for j in i + 1..len {
                if Instant::now() >= deadline {
                    return SearchStep::DeadlineHit;
                }
                let mut candidate = routes[r].clone();
                candidate[i..=j].reverse();
                if let Ok(schedule) = route_schedule(&candidate, problem) {
                    if route_cost(&schedule, problem) + 1e-9 < current {
                        routes[r] = candidate;
                        return SearchStep::Improved;
                    }
                }
            }
        }
    }

    // Or-opt: relocate a single stop within or across routes.
    let total = match solution_cost(routes, problem) {
        Some(cost) => cost,
        None => return SearchStep::Converged,
    };
    for src in 0..routes.len() {
        for i in 0..routes[src].len() {
            let stop = routes[src][i];
            for dst in 0..routes.len() {
                let positions = if dst == src {
                    routes[dst].len() // removal shifts indices; len is enough
                } else {
                    routes[dst].len() + 1
                };
                for pos in 0..positions {
                    if src == dst && pos == i {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return SearchStep::DeadlineHit;
                    }
                    let mut candidate = routes.clone();
                    candidate[src].remove(i);
                    let insert_at = pos.min(candidate[dst].len());
                    candidate[dst].insert(insert_at, stop);
                    candidate.retain(|route| !route.is_empty());
                    if let Some(cost) = solution_cost(&candidate, problem) {
                        if cost + 1e-9 < total {
                            *routes = candidate;
                            return SearchStep::Improved;
                        }
                    }
                }
            }
        }
    }

    SearchStep::Converged
}

pub struct RouteOptimizationService {
    config: RoutingConfig,
}

impl RouteOptimizationService {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Solves the routing request. Every stop is covered exactly once across
    /// the returned routes or the call fails with `InfeasibleRouting`.
    #[instrument(skip(self, stops, vehicle, solver), fields(stop_count = stops.len()))]
    pub fn optimize(
        &self,
        warehouse_id: &str,
        depot: &Depot,
        stops: &[DeliveryStop],
        vehicle: &VehicleOptions,
        solver: &SolverOptions,
    ) -> Result<RoutingSolution, EngineError> {
        if stops.is_empty() {
            return Err(EngineError::ValidationError(
                "at least one delivery stop is required".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for stop in stops {
            if !seen.insert(stop.stop_id.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "duplicate stop_id {}",
                    stop.stop_id
                )));
            }
            if let Some(window) = stop.time_window {
                if window.start_minute > window.end_minute {
                    return Err(EngineError::ValidationError(format!(
                        "stop {} has an inverted time window",
                        stop.stop_id
                    )));
                }
            }
        }

        let capacity = vehicle.capacity.unwrap_or(self.config.default_capacity);
        let preset = solver.preset.unwrap_or(self.config.preset);
        let problem = Problem {
            stops,
            dist: distance_matrix(depot, stops),
            capacity,
            speed_kmh: vehicle.avg_speed_kmh.unwrap_or(self.config.avg_speed_kmh),
            default_service_minutes: vehicle
                .service_minutes
                .unwrap_or(self.config.service_minutes),
            max_route_minutes: vehicle
                .max_route_minutes
                .unwrap_or(self.config.max_route_minutes),
            weights: preset.weights(),
            vehicle_fixed_cost: self.config.vehicle_fixed_cost,
        };

        // Every stop must be servable on a route of its own; anything less
        // is a hard infeasibility with a named constraint.
        for (i, stop) in stops.iter().enumerate() {
            if stop.demand_qty > capacity {
                return Err(EngineError::InfeasibleRouting(
                    RoutingDiagnostic::CapacityExceeded {
                        stop_id: stop.stop_id.clone(),
                        demand_qty: stop.demand_qty,
                        vehicle_capacity: capacity,
                    },
                ));
            }
            match route_schedule(&[i], &problem) {
                Ok(_) => {}
                Err(Violation::TimeWindow(s)) => {
                    return Err(EngineError::InfeasibleRouting(
                        RoutingDiagnostic::TimeWindowUnreachable {
                            stop_id: stops[s].stop_id.clone(),
                            tw_end: stops[s]
                                .time_window
                                .map(|w| w.end_minute)
                                .unwrap_or_default(),
                        },
                    ));
                }
                Err(Violation::Duration(s)) => {
                    return Err(EngineError::InfeasibleRouting(
                        RoutingDiagnostic::RouteDurationExceeded {
                            stop_id: stops[s].stop_id.clone(),
                            max_minutes: problem.max_route_minutes,
                        },
                    ));
                }
                Err(Violation::Capacity) => {
                    return Err(EngineError::InfeasibleRouting(
                        RoutingDiagnostic::CapacityExceeded {
                            stop_id: stop.stop_id.clone(),
                            demand_qty: stop.demand_qty,
                            vehicle_capacity: capacity,
                        },
                    ));
                }
            }
        }

        let time_limit = StdDuration::from_millis(
            solver.time_limit_ms.unwrap_or(self.config.time_limit_ms).max(1),
        );
        let deadline = Instant::now() + time_limit;
        let seed = solver.seed.unwrap_or(self.config.seed);
        let mut rng = StdRng::seed_from_u64(seed);

        // Deterministic first pass: farthest stops placed first, so the
        // expensive anchors shape the routes. Restarts shuffle the order.
        let mut base_order: Vec<usize> = (0..stops.len()).collect();
        base_order.sort_by(|&a, &b| {
            problem.dist[0][b + 1]
                .partial_cmp(&problem.dist[0][a + 1])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut best: Option<(f64, Vec<Vec<usize>>)> = None;
        let mut partial = false;

        for attempt in 0..self.config.restarts.max(1) {
            let order = if attempt == 0 {
                base_order.clone()
            } else {
                let mut shuffled = base_order.clone();
                shuffled.shuffle(&mut rng);
                shuffled
            };

            let mut routes = construct(&order, &problem);
            let mut cut_short = false;
            loop {
                match improve_once(&mut routes, &problem, deadline) {
                    SearchStep::Improved => continue,
                    SearchStep::Converged => break,
                    SearchStep::DeadlineHit => {
                        cut_short = true;
                        break;
                    }
                }
            }

            let cost = solution_cost(&routes, &problem)
                .ok_or_else(|| EngineError::InternalError("constructed infeasible routes".into()))?;
            if best
                .as_ref()
                .map_or(true, |(best_cost, _)| cost + 1e-9 < *best_cost)
            {
                best = Some((cost, routes));
            }

            // The budget expired before the search ran its course; what we
            // have is the best-so-far, not a converged solution.
            if cut_short {
                partial = true;
                break;
            }
            if Instant::now() >= deadline {
                partial = attempt + 1 < self.config.restarts.max(1);
                break;
            }
        }

        let (cost, routes) = best.expect("at least one attempt ran");
        debug!(cost, routes = routes.len(), partial, "routing solve finished");

        Ok(self.build_solution(warehouse_id, depot, stops, &problem, routes, partial))
    }

    fn build_solution(
        &self,
        warehouse_id: &str,
        depot: &Depot,
        stops: &[DeliveryStop],
        problem: &Problem<'_>,
        routes: Vec<Vec<usize>>,
        partial: bool,
    ) -> RoutingSolution {
        let mut built = Vec::with_capacity(routes.len());

        for (r, route) in routes.iter().enumerate() {
            let schedule =
                route_schedule(route, problem).expect("published routes are feasible");

            let planned: Vec<PlannedStop> = route
                .iter()
                .zip(schedule.timings.iter())
                .enumerate()
                .map(|(seq, (&stop, timing))| {
                    let stop = &stops[stop];
                    PlannedStop {
                        stop_id: stop.stop_id.clone(),
                        client_id: stop.client_id.clone(),
                        lat: stop.lat,
                        lng: stop.lng,
                        demand_qty: stop.demand_qty,
                        sequence: seq as u32 + 1,
                        arrival_minute: timing.arrival,
                        wait_minutes: timing.wait,
                        departure_minute: timing.departure,
                    }
                })
                .collect();

            let lower_bound_km = route
                .iter()
                .map(|&stop| 2.0 * haversine_km(depot.lat, depot.lng, stops[stop].lat, stops[stop].lng))
                .fold(0.0_f64, f64::max);

            built.push(Route {
                route_id: format!("ROUTE-{}", r + 1),
                warehouse_id: warehouse_id.to_string(),
                stops: planned,
                total_distance_km: schedule.distance_km,
                estimated_minutes: schedule.total_minutes,
                estimated_cost: schedule.distance_km * self.config.cost_per_km,
                efficiency_score: efficiency_score(lower_bound_km, schedule.distance_km),
                total_demand: schedule.demand,
                utilization: (schedule.demand as f64 / problem.capacity as f64 * 100.0).min(100.0),
            });
        }

        let statistics = statistics(&built);
        RoutingSolution {
            warehouse_id: warehouse_id.to_string(),
            routes: built,
            statistics,
            partial,
        }
    }
}

fn distance_matrix(depot: &Depot, stops: &[DeliveryStop]) -> Vec<Vec<f64>> {
    let mut points = Vec::with_capacity(stops.len() + 1);
    points.push((depot.lat, depot.lng));
    points.extend(stops.iter().map(|s| (s.lat, s.lng)));

    let n = points.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                matrix[i][j] = haversine_km(points[i].0, points[i].1, points[j].0, points[j].1);
            }
        }
    }
    matrix
}

fn statistics(routes: &[Route]) -> RouteStatistics {
    let total_routes = routes.len();
    let total_stops: usize = routes.iter().map(|r| r.stops.len()).sum();
    let total_distance_km: f64 = routes.iter().map(|r| r.total_distance_km).sum();
    let total_minutes: f64 = routes.iter().map(|r| r.estimated_minutes).sum();
    let total_cost: f64 = routes.iter().map(|r| r.estimated_cost).sum();

    let mut distribution = EfficiencyDistribution {
        excellent: 0,
        good: 0,
        fair: 0,
        poor: 0,
    };
    let mut weighted_efficiency = 0.0;
    for route in routes {
        match route.efficiency_score {
            s if s >= 90.0 => distribution.excellent += 1,
            s if s >= 70.0 => distribution.good += 1,
            s if s >= 50.0 => distribution.fair += 1,
            _ => distribution.poor += 1,
        }
        weighted_efficiency += route.efficiency_score * route.stops.len() as f64;
    }

    let denom = total_routes.max(1) as f64;
    RouteStatistics {
        total_routes,
        total_stops,
        total_distance_km,
        total_minutes,
        total_cost,
        average_distance_km: total_distance_km / denom,
        average_minutes: total_minutes / denom,
        average_stops: total_stops as f64 / denom,
        efficiency_distribution: distribution,
        overall_efficiency: if total_stops > 0 {
            weighted_efficiency / total_stops as f64
        } else {
            0.0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn depot() -> Depot {
        Depot {
            name: Some("Central".into()),
            lat: 40.7128,
            lng: -74.0060,
        }
    }

    fn stop(id: &str, lat: f64, lng: f64, demand: u32) -> DeliveryStop {
        DeliveryStop {
            stop_id: id.to_string(),
            client_id: format!("CL-{}", id),
            lat,
            lng,
            demand_qty: demand,
            time_window: None,
            service_minutes: None,
        }
    }

    fn ring_stops(count: usize, demand: u32) -> Vec<DeliveryStop> {
        (0..count)
            .map(|i| {
                let angle = i as f64 / count as f64 * std::f64::consts::TAU;
                stop(
                    &format!("S{}", i + 1),
                    40.7128 + 0.05 * angle.cos(),
                    -74.0060 + 0.05 * angle.sin(),
                    demand,
                )
            })
            .collect()
    }

    fn service() -> RouteOptimizationService {
        RouteOptimizationService::new(RoutingConfig::default())
    }

    fn covered_ids(solution: &RoutingSolution) -> Vec<String> {
        let mut ids: Vec<String> = solution
            .routes
            .iter()
            .flat_map(|r| r.stops.iter().map(|s| s.stop_id.clone()))
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn single_vehicle_when_capacity_suffices() {
        // 10 stops, capacity 100, total demand 95
        let mut stops = ring_stops(10, 9);
        stops[0].demand_qty = 14; // 9*9 + 14 = 95

        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions {
                    capacity: Some(100),
                    ..VehicleOptions::default()
                },
                &SolverOptions::default(),
            )
            .unwrap();

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].stops.len(), 10);
        assert_eq!(solution.routes[0].total_demand, 95);
        assert!(solution.routes[0].total_demand <= 100);
        assert!(!solution.partial);
    }

    #[test]
    fn every_stop_is_covered_exactly_once() {
        let stops = ring_stops(12, 40);
        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions {
                    capacity: Some(100),
                    ..VehicleOptions::default()
                },
                &SolverOptions::default(),
            )
            .unwrap();

        let mut expected: Vec<String> = stops.iter().map(|s| s.stop_id.clone()).collect();
        expected.sort();
        assert_eq!(covered_ids(&solution), expected);

        for route in &solution.routes {
            assert!(route.total_demand <= 100);
        }
        // 12 stops * 40 units at capacity 100 needs at least 5 vehicles
        assert!(solution.routes.len() >= 5);
    }

    #[test]
    fn oversized_stop_is_infeasible_with_capacity_diagnostic() {
        let mut stops = ring_stops(3, 10);
        stops[1].demand_qty = 500;

        let err = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions {
                    capacity: Some(100),
                    ..VehicleOptions::default()
                },
                &SolverOptions::default(),
            )
            .unwrap_err();

        assert_matches!(
            err,
            EngineError::InfeasibleRouting(RoutingDiagnostic::CapacityExceeded {
                demand_qty: 500,
                vehicle_capacity: 100,
                ..
            })
        );
    }

    #[test]
    fn unreachable_window_is_infeasible_with_time_diagnostic() {
        let mut stops = ring_stops(2, 10);
        // ~5.5 km away but the window closes after one minute
        stops[0].time_window = Some(TimeWindow {
            start_minute: 0,
            end_minute: 1,
        });

        let err = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap_err();

        assert_matches!(
            err,
            EngineError::InfeasibleRouting(RoutingDiagnostic::TimeWindowUnreachable { .. })
        );
    }

    #[test]
    fn early_arrival_waits_for_the_window_to_open() {
        let stops = vec![DeliveryStop {
            time_window: Some(TimeWindow {
                start_minute: 120,
                end_minute: 240,
            }),
            ..stop("S1", 40.75, -74.0, 10)
        }];

        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap();

        let planned = &solution.routes[0].stops[0];
        assert!(planned.arrival_minute < 120.0);
        assert!(planned.wait_minutes > 0.0);
        assert!(planned.departure_minute >= 120.0);
    }

    #[test]
    fn windows_order_the_route() {
        let mut stops = ring_stops(3, 10);
        stops[0].time_window = Some(TimeWindow {
            start_minute: 200,
            end_minute: 300,
        });
        stops[1].time_window = Some(TimeWindow {
            start_minute: 0,
            end_minute: 60,
        });
        stops[2].time_window = Some(TimeWindow {
            start_minute: 100,
            end_minute: 160,
        });

        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap();

        for route in &solution.routes {
            let mut last_arrival = -1.0;
            for planned in &route.stops {
                assert!(planned.arrival_minute + planned.wait_minutes >= last_arrival);
                last_arrival = planned.arrival_minute + planned.wait_minutes;
                if let Some(window) = stops
                    .iter()
                    .find(|s| s.stop_id == planned.stop_id)
                    .and_then(|s| s.time_window)
                {
                    let start = planned.arrival_minute + planned.wait_minutes;
                    assert!(start >= window.start_minute as f64 - 1e-9);
                    assert!(start <= window.end_minute as f64 + 1e-9);
                }
            }
        }
    }

    #[test]
    fn fixed_seed_solves_are_reproducible() {
        let stops = ring_stops(9, 25);
        let options = SolverOptions {
            seed: Some(1234),
            ..SolverOptions::default()
        };

        let a = service()
            .optimize("WH001", &depot(), &stops, &VehicleOptions::default(), &options)
            .unwrap();
        let b = service()
            .optimize("WH001", &depot(), &stops, &VehicleOptions::default(), &options)
            .unwrap();

        let ids_a: Vec<Vec<String>> = a
            .routes
            .iter()
            .map(|r| r.stops.iter().map(|s| s.stop_id.clone()).collect())
            .collect();
        let ids_b: Vec<Vec<String>> = b
            .routes
            .iter()
            .map(|r| r.stops.iter().map(|s| s.stop_id.clone()).collect())
            .collect();
        assert_eq!(ids_a, ids_b);
        assert!((a.statistics.total_distance_km - b.statistics.total_distance_km).abs() < 1e-9);
    }

    #[test]
    fn efficiency_recomputes_from_route_values() {
        let stops = ring_stops(6, 10);
        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap();

        let d = depot();
        for route in &solution.routes {
            let lower_bound = route
                .stops
                .iter()
                .map(|s| 2.0 * haversine_km(d.lat, d.lng, s.lat, s.lng))
                .fold(0.0_f64, f64::max);
            let recomputed = efficiency_score(lower_bound, route.total_distance_km);
            assert!((recomputed - route.efficiency_score).abs() < 1e-9);
            assert!(route.efficiency_score >= 0.0 && route.efficiency_score <= 100.0);
        }
    }

    #[test]
    fn single_stop_route_is_perfectly_efficient() {
        let stops = vec![stop("S1", 40.75, -74.0, 10)];
        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap();
        assert!((solution.routes[0].efficiency_score - 100.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_stop_ids_are_rejected() {
        let mut stops = ring_stops(2, 10);
        stops[1].stop_id = stops[0].stop_id.clone();
        let err = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap_err();
        assert_matches!(err, EngineError::ValidationError(_));
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = service()
            .optimize(
                "WH001",
                &depot(),
                &[],
                &VehicleOptions::default(),
                &SolverOptions::default(),
            )
            .unwrap_err();
        assert_matches!(err, EngineError::ValidationError(_));
    }

    #[test]
    fn presets_change_the_objective() {
        let balanced = ObjectivePreset::Balanced.weights();
        let distance = ObjectivePreset::DistanceFirst.weights();
        assert!(distance.distance > balanced.distance);
        let cost = ObjectivePreset::CostFirst.weights();
        assert!(cost.vehicles > balanced.vehicles);
    }

    #[test]
    fn statistics_roll_up_the_routes() {
        let stops = ring_stops(8, 30);
        let solution = service()
            .optimize(
                "WH001",
                &depot(),
                &stops,
                &VehicleOptions {
                    capacity: Some(90),
                    ..VehicleOptions::default()
                },
                &SolverOptions::default(),
            )
            .unwrap();

        let stats = &solution.statistics;
        assert_eq!(stats.total_stops, 8);
        assert_eq!(stats.total_routes, solution.routes.len());
        let sum: f64 = solution.routes.iter().map(|r| r.total_distance_km).sum();
        assert!((stats.total_distance_km - sum).abs() < 1e-9);
        let banded = stats.efficiency_distribution.excellent
            + stats.efficiency_distribution.good
            + stats.efficiency_distribution.fair
            + stats.efficiency_distribution.poor;
        assert_eq!(banded, stats.total_routes);
    }
}
