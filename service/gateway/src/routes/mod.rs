//! Gateway HTTP Front End (GFE): the routing surface exposed at the gateway origin, per
//! spec §4.8. Each route is a thin translation from the wire shape to the relevant
//! manager (AC/PM/CM) or proxy (HP/WP); the managers hold all the real logic.

mod auth_routes;
mod preset_routes;
mod proxy_routes;
mod sandbox_routes;

pub use auth_routes::*;
pub use preset_routes::*;
pub use proxy_routes::*;
pub use sandbox_routes::*;

use rocket::Route;

/// All mounted routes, grouped the way spec §4.8 lists them. `proxy_routes` is mounted last
/// since its catch-all consumes anything the earlier, more specific routes didn't match.
pub fn all() -> Vec<Route> {
    let mut routes = rocket::routes![
        auth_routes::register,
        auth_routes::login,
        auth_routes::refresh,
        auth_routes::create_api_key,
        auth_routes::create_session,
        auth_routes::claim_session,
        auth_routes::status,
        auth_routes::info,
        sandbox_routes::create_sandbox,
        sandbox_routes::get_sandbox,
        sandbox_routes::delete_sandbox,
        sandbox_routes::find_or_create_sandbox,
        sandbox_routes::find_sandbox,
        sandbox_routes::extend_sandbox,
        preset_routes::list_presets,
        preset_routes::create_preset,
        preset_routes::delete_preset,
    ];
    routes.extend(rocket::routes![
        proxy_routes::websocket_upgrade,
        proxy_routes::proxy_catchall,
    ]);
    routes
}
